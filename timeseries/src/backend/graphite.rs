//! Graphite plaintext-protocol backend.
//!
//! Sends `<prefix.>key value time\n` lines to a carbon receiver over TCP.
//! The connection is opened at enable time. If a write fails the connection
//! is dropped and the next batch attempts one reconnect before failing.

use std::io::{self, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use clap::Parser;

use super::{Backend, BackendId, ResolvedKey, parse_options};
use crate::error::BackendError;

const NAME: &str = "graphite";

/// Options accepted by the `graphite` backend.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = NAME, disable_help_flag = true)]
pub struct GraphiteOptions {
    /// Carbon receiver host.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Carbon plaintext port.
    #[arg(short, long, default_value_t = 2003)]
    pub port: u16,

    /// Prefix prepended to every key, joined with `.`.
    #[arg(short = 'P', long)]
    pub prefix: Option<String>,

    /// Connect timeout in milliseconds.
    #[arg(short, long = "timeout-ms", default_value_t = 5000)]
    pub timeout_ms: u64,
}

impl GraphiteOptions {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Streams entries to a graphite carbon receiver.
pub struct GraphiteBackend {
    options: Option<GraphiteOptions>,
    conn: Option<BufWriter<TcpStream>>,
}

impl GraphiteBackend {
    /// Creates a disabled graphite backend.
    pub fn new() -> Self {
        Self {
            options: None,
            conn: None,
        }
    }

    fn connect(options: &GraphiteOptions) -> Result<BufWriter<TcpStream>, BackendError> {
        let address = options.address();
        let unavailable = |e: io::Error| BackendError::Unavailable {
            backend: NAME.to_string(),
            resource: address.clone(),
            source: e,
        };

        let timeout = Duration::from_millis(options.timeout_ms);
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for addr in address.to_socket_addrs().map_err(unavailable)? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(timeout)).map_err(unavailable)?;
                    return Ok(BufWriter::new(stream));
                }
                Err(e) => last_error = e,
            }
        }
        Err(unavailable(last_error))
    }
}

impl Default for GraphiteBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Makes `node` usable as a single graphite path component.
///
/// Periods become hyphens and slashes become underscores, so `10.0.0.1` maps
/// to `10-0-0-1` instead of four nested nodes.
pub fn graphite_safe_node(node: &str) -> String {
    node.chars()
        .map(|c| match c {
            '.' => '-',
            '/' => '_',
            _ => c,
        })
        .collect()
}

fn write_lines(out: &mut impl Write, entries: &[(&ResolvedKey, u64)], time: u32) -> io::Result<()> {
    for (key, value) in entries {
        out.write_all(key.as_bytes())?;
        writeln!(out, "{value} {time}")?;
    }
    out.flush()
}

impl Backend for GraphiteBackend {
    fn id(&self) -> BackendId {
        BackendId::GRAPHITE
    }

    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, options: &str) -> Result<(), BackendError> {
        let options: GraphiteOptions = parse_options(NAME, options)?;
        let conn = Self::connect(&options)?;
        tracing::debug!("graphite connected to {}", options.address());
        self.conn = Some(conn);
        self.options = Some(options);
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(mut conn) = self.conn.take()
            && let Err(e) = conn.flush()
        {
            tracing::warn!("graphite final flush failed: {e}");
        }
        self.options = None;
    }

    fn resolve(&mut self, key: &str) -> Result<ResolvedKey, BackendError> {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(BackendError::Resolve {
                backend: NAME.to_string(),
                key: key.to_string(),
                reason: "graphite keys must be non-empty and contain no whitespace".to_string(),
            });
        }
        let prefix = self.options.as_ref().and_then(|o| o.prefix.as_deref());
        let line_start = match prefix {
            Some(prefix) => format!("{prefix}.{key} "),
            None => format!("{key} "),
        };
        Ok(ResolvedKey::new(line_start))
    }

    fn write_batch(&mut self, entries: &[(&ResolvedKey, u64)], time: u32) -> Result<(), BackendError> {
        let options = self.options.as_ref().ok_or_else(|| BackendError::NotEnabled {
            backend: NAME.to_string(),
        })?;

        if self.conn.is_none() {
            tracing::debug!("graphite reconnecting to {}", options.address());
            self.conn = Some(Self::connect(options)?);
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(BackendError::NotEnabled {
                backend: NAME.to_string(),
            });
        };

        write_lines(conn, entries, time).map_err(|e| {
            self.conn = None;
            BackendError::Write {
                backend: NAME.to_string(),
                source: e,
            }
        })
    }
}
