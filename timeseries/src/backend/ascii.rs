//! Plain-text backend: one `key value time` line per entry.
//!
//! Writes to stdout by default or to a file given with `-f`.
//!
//! ```text
//! a.test.key 12345 532051200
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;

use super::{Backend, BackendId, ResolvedKey, parse_options};
use crate::error::BackendError;

const NAME: &str = "ascii";

/// Options accepted by the `ascii` backend.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = NAME, disable_help_flag = true)]
pub struct AsciiOptions {
    /// File to write to (default: stdout).
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Append to the file instead of truncating it.
    #[arg(short, long)]
    pub append: bool,
}

enum Sink {
    Stdout(io::Stdout),
    File(BufWriter<File>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Stdout(out) => out,
            Sink::File(file) => file,
        }
    }
}

/// Writes entries as text lines to stdout or a file.
pub struct AsciiBackend {
    sink: Option<Sink>,
}

impl AsciiBackend {
    /// Creates a disabled ascii backend.
    pub fn new() -> Self {
        Self { sink: None }
    }

    fn open(options: &AsciiOptions) -> Result<Sink, BackendError> {
        let Some(path) = &options.file else {
            return Ok(Sink::Stdout(io::stdout()));
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(options.append)
            .truncate(!options.append)
            .open(path)
            .map_err(|e| BackendError::Unavailable {
                backend: NAME.to_string(),
                resource: path.display().to_string(),
                source: e,
            })?;

        Ok(Sink::File(BufWriter::new(file)))
    }
}

impl Default for AsciiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for AsciiBackend {
    fn id(&self) -> BackendId {
        BackendId::ASCII
    }

    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, options: &str) -> Result<(), BackendError> {
        let options: AsciiOptions = parse_options(NAME, options)?;
        self.sink = Some(Self::open(&options)?);
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(mut sink) = self.sink.take()
            && let Err(e) = sink.writer().flush()
        {
            tracing::warn!("ascii final flush failed: {e}");
        }
    }

    fn resolve(&mut self, key: &str) -> Result<ResolvedKey, BackendError> {
        if key.contains(char::is_whitespace) {
            return Err(BackendError::Resolve {
                backend: NAME.to_string(),
                key: key.to_string(),
                reason: "key contains whitespace".to_string(),
            });
        }
        Ok(ResolvedKey::new(format!("{key} ")))
    }

    fn write_batch(&mut self, entries: &[(&ResolvedKey, u64)], time: u32) -> Result<(), BackendError> {
        let sink = self.sink.as_mut().ok_or_else(|| BackendError::NotEnabled {
            backend: NAME.to_string(),
        })?;
        let out = sink.writer();

        let write = |out: &mut dyn Write| -> io::Result<()> {
            for (key, value) in entries {
                out.write_all(key.as_bytes())?;
                writeln!(out, "{value} {time}")?;
            }
            out.flush()
        };

        write(out).map_err(|e| BackendError::Write {
            backend: NAME.to_string(),
            source: e,
        })
    }
}
