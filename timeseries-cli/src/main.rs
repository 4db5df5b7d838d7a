//! CLI for the timeseries metric emission runtime.
//!
//! Lists the available backends, emits single values, and pipes a stream of
//! `key value time` lines through a key package.

mod stats;

use std::io::{self, BufRead};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use timeseries::{BackendInfo, KeyPackage, Timeseries};
use tracing_subscriber::EnvFilter;

use crate::stats::{PipeStats, unix_now};

/// timeseries: emit metrics to pluggable timeseries backends.
#[derive(Parser)]
#[command(name = "timeseries", version, about)]
struct Cli {
    /// Backend to enable, as `name` or `name:options` (repeatable),
    /// e.g. `-b "ascii:-f out.txt"`.
    #[arg(short, long = "backend", global = true)]
    backends: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List every registered backend with its id and state.
    Backends {
        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a single value for a single key.
    Set {
        /// Metric key.
        key: String,
        /// Value to write.
        value: u64,
        /// Timestamp in seconds since the Unix epoch.
        time: u32,
    },

    /// Read `key value time` lines from stdin and flush whenever the time changes.
    Pipe {
        /// Zero values after every flush.
        #[arg(long)]
        reset: bool,

        /// Only emit keys updated since the previous flush.
        #[arg(long)]
        disable: bool,

        #[command(flatten)]
        stats: StatsArgs,
    },
}

/// Self-monitoring options for `pipe`.
#[derive(Args)]
struct StatsArgs {
    /// Backend for the pipe's own counters, as `name` or `name:options`.
    /// Counters are off unless this is given.
    #[arg(long = "stats-backend")]
    backend: Option<String>,

    /// Seconds per counter interval.
    #[arg(long = "stats-interval", default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..))]
    interval: u32,

    /// Dotted prefix of every counter key.
    #[arg(long = "stats-prefix", default_value = "systems.services.tsk")]
    prefix: String,

    /// Node appended to the prefix (repeatable); dots and slashes are replaced.
    #[arg(long = "stats-node")]
    nodes: Vec<String>,
}

/// Output format for the backend listing.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// One line per backend.
    Text,
    /// JSON array of objects.
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut ts = Timeseries::new();

    let result = enable_backends(&mut ts, &cli.backends).and_then(|()| match cli.command {
        Commands::Backends { format } => cmd_backends(&ts, &format),
        Commands::Set { key, value, time } => cmd_set(&ts, &key, value, time),
        Commands::Pipe { reset, disable, stats: args } => {
            let mut stats_ts = Timeseries::new();
            let stats = match &args.backend {
                Some(spec) => {
                    enable_backends(&mut stats_ts, std::slice::from_ref(spec))?;
                    Some(PipeStats::new(
                        &stats_ts,
                        &args.prefix,
                        &args.nodes,
                        args.interval,
                        Box::new(unix_now),
                    ))
                }
                None => None,
            };
            cmd_pipe(&ts, reset, disable, stats, io::stdin().lock())
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Installs a stderr subscriber; `RUST_LOG` overrides `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Splits `name:options` into its parts; options default to empty.
fn parse_backend_spec(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((name, options)) => (name, options),
        None => (spec, ""),
    }
}

fn enable_backends(ts: &mut Timeseries, specs: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    for spec in specs {
        let (name, options) = parse_backend_spec(spec);
        let id = ts
            .get_backend_by_name(name)
            .map(|b| b.id())
            .ok_or_else(|| format!("unknown backend '{name}'"))?;
        ts.enable_backend(id, options)?;
    }
    Ok(())
}

/// Implements `timeseries backends`.
fn cmd_backends(ts: &Timeseries, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let infos: Vec<BackendInfo> = ts.get_all_backends().iter().map(|b| b.info()).collect();

    match format {
        OutputFormat::Text => {
            println!("{:<4} {:<12} ENABLED", "ID", "NAME");
            for info in &infos {
                println!("{:<4} {:<12} {}", info.id, info.name, info.enabled);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&infos)?),
    }
    Ok(())
}

/// Implements `timeseries set <key> <value> <time>`.
fn cmd_set(ts: &Timeseries, key: &str, value: u64, time: u32) -> Result<(), Box<dyn std::error::Error>> {
    if ts.enabled_backends().is_empty() {
        tracing::warn!("no backends enabled, value for '{key}' goes nowhere");
    }
    ts.set_single(key, value, time)?;
    Ok(())
}

/// Parses one `key value time` line.
fn parse_line(line: &str) -> Result<(&str, u64, u32), String> {
    let mut fields = line.split_whitespace();
    let (Some(key), Some(value), Some(time), None) = (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err("expected 'key value time'".to_string());
    };
    let value = value.parse().map_err(|e| format!("bad value '{value}': {e}"))?;
    let time = time.parse().map_err(|e| format!("bad time '{time}': {e}"))?;
    Ok((key, value, time))
}

/// Flushes at `time`; with `disable`, keys must be seen again to be re-emitted.
fn flush(kp: &mut KeyPackage<'_>, time: u32, disable: bool, stats: Option<&mut PipeStats<'_>>) -> bool {
    tracing::debug!("flushing {} of {} keys at {time}", kp.enabled_size(), kp.size());
    if let Some(stats) = stats {
        stats.record_flush(kp.enabled_size());
    }
    let ok = match kp.flush(time) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("flush at {time} failed: {e}");
            false
        }
    };
    if disable {
        kp.disable_all();
    }
    ok
}

/// Implements `timeseries pipe`.
fn cmd_pipe(
    ts: &Timeseries,
    reset: bool,
    disable: bool,
    mut stats: Option<PipeStats<'_>>,
    input: impl BufRead,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut kp = ts.new_key_package(reset, disable);
    let mut current_time: Option<u32> = None;
    let mut failed_flushes = 0usize;

    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value, time) = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::warn!("skipping line {}: {reason}", lineno + 1);
                continue;
            }
        };

        match current_time {
            Some(previous) if previous != time => {
                if !flush(&mut kp, previous, disable, stats.as_mut()) {
                    failed_flushes += 1;
                }
                current_time = Some(time);
            }
            None => current_time = Some(time),
            Some(_) => {}
        }

        let idx = kp.add_key(key);
        kp.enable_key(idx);
        kp.set(idx, value);

        if let Some(stats) = stats.as_mut() {
            stats.record_message(line.len());
            stats.maybe_flush();
        }
    }

    if let Some(time) = current_time
        && !flush(&mut kp, time, disable, stats.as_mut())
    {
        failed_flushes += 1;
    }
    if let Some(stats) = stats {
        stats.finish();
    }

    if failed_flushes > 0 {
        return Err(format!("{failed_flushes} flush(es) failed").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeseries::backend::memory::MemoryBackend;
    use timeseries::{BackendId, BackendRegistry};

    fn memory_timeseries() -> (Timeseries, timeseries::backend::memory::MemorySink) {
        let backend = MemoryBackend::new(BackendId(1), "memory");
        let sink = backend.sink();
        let mut registry = BackendRegistry::empty();
        registry.register(Box::new(backend)).unwrap();
        let mut ts = Timeseries::with_registry(registry);
        ts.enable_backend(BackendId(1), "").unwrap();
        (ts, sink)
    }

    fn entries(batch: &timeseries::backend::memory::Batch) -> Vec<(&str, u64)> {
        batch.entries.iter().map(|(k, v)| (k.as_str(), *v)).collect()
    }

    #[test]
    fn test_parse_backend_spec() {
        assert_eq!(parse_backend_spec("ascii"), ("ascii", ""));
        assert_eq!(parse_backend_spec("ascii:-f out.txt"), ("ascii", "-f out.txt"));
        assert_eq!(parse_backend_spec("graphite:-H a:b"), ("graphite", "-H a:b"));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("a.b 5 1000"), Ok(("a.b", 5, 1000)));
        assert!(parse_line("a.b 5").is_err());
        assert!(parse_line("a.b -5 1000").is_err());
        assert!(parse_line("a.b 5 1000 extra").is_err());
    }

    #[test]
    fn test_pipe_flushes_when_time_changes() {
        let (ts, sink) = memory_timeseries();
        let input = "a 1 100\nb 2 100\n# comment\n\nbad line\na 3 160\n";

        cmd_pipe(&ts, false, false, None, input.as_bytes()).unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].time, 100);
        assert_eq!(entries(&batches[0]), vec![("a", 1), ("b", 2)]);
        assert_eq!(batches[1].time, 160);
        assert_eq!(entries(&batches[1]), vec![("a", 3), ("b", 2)]);
    }

    #[test]
    fn test_pipe_disable_emits_only_updated_keys() {
        let (ts, sink) = memory_timeseries();
        let input = "a 1 100\nb 2 100\na 3 160\n";

        cmd_pipe(&ts, false, true, None, input.as_bytes()).unwrap();

        let batches = sink.batches();
        assert_eq!(entries(&batches[0]), vec![("a", 1), ("b", 2)]);
        assert_eq!(entries(&batches[1]), vec![("a", 3)]);
    }

    #[test]
    fn test_pipe_counts_its_own_activity() {
        let (ts, sink) = memory_timeseries();
        let (stats_ts, stats_sink) = memory_timeseries();
        let mut ticks = [1000u32, 1000, 1000, 1090].into_iter();
        let stats = PipeStats::new(
            &stats_ts,
            "systems.services.tsk",
            &["my.host".to_string()],
            60,
            Box::new(move || ticks.next().unwrap_or(1090)),
        );
        let input = "a 1 100\nb 2 100\nnot a line at all\na 3 160\n";

        cmd_pipe(&ts, false, false, Some(stats), input.as_bytes()).unwrap();
        assert_eq!(sink.batches().len(), 2);

        let batches = stats_sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].time, 960);
        assert_eq!(
            entries(&batches[0]),
            vec![
                ("systems.services.tsk.my-host.flush_cnt", 1),
                ("systems.services.tsk.my-host.flushed_key_cnt", 2),
                ("systems.services.tsk.my-host.messages_cnt", 3),
                ("systems.services.tsk.my-host.messages_bytes", 21),
            ]
        );
        // Counters were reset; the EOF flush is the only activity left.
        assert_eq!(batches[1].time, 1080);
        let values: Vec<u64> = batches[1].entries.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 2, 0, 0]);
    }

    #[test]
    fn test_enable_backends_rejects_unknown_name() {
        let mut ts = Timeseries::new();
        assert!(enable_backends(&mut ts, &["nope".to_string()]).is_err());
    }
}
