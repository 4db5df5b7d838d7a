//! Prometheus remote-write backend.
//!
//! Serializes each flushed batch to the Prometheus remote-write protobuf
//! format and POSTs it, snappy-compressed, to a configurable endpoint.
//!
//! This module is only available when the `prometheus-remote-write` feature
//! is enabled.
//!
//! # Options
//!
//! ```text
//! -u http://localhost:9090/api/v1/write -t 10000 -l instance=host1 -l dc=east
//! ```
//!
//! Resolution sanitizes the key into a legal Prometheus metric name, so
//! `systems.services.tsk.flush_cnt` is sent as `systems_services_tsk_flush_cnt`.

use std::time::Duration;

use clap::Parser;
use prost::Message;

use super::{Backend, BackendId, ResolvedKey, parse_options};
use crate::error::BackendError;

const NAME: &str = "prometheus";

/// Prometheus remote-write protobuf types.
///
/// Hand-written types matching `prometheus/prompb/remote.proto`.
/// Using prost derives avoids the need for protoc and proto file management.
pub mod proto {
    /// A write request containing one or more time series.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// The time series to write.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A single time series with labels and samples.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Metric labels identifying the series.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Data samples for this series.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A key-value label pair.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        /// Label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// Label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single data sample (value + timestamp).
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The sample value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Timestamp in milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

/// Options accepted by the `prometheus` backend.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = NAME, disable_help_flag = true)]
pub struct PrometheusOptions {
    /// Remote write endpoint URL (e.g., `http://localhost:9090/api/v1/write`).
    #[arg(short, long)]
    pub url: String,

    /// HTTP timeout for write requests, in milliseconds.
    #[arg(short, long = "timeout-ms", default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Retry attempts after a failed request (backoff doubles from 100ms).
    #[arg(short, long, default_value_t = 0)]
    pub retries: u32,

    /// External label `name=value` added to every series.
    #[arg(short, long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

struct Endpoint {
    options: PrometheusOptions,
    client: reqwest::blocking::Client,
}

/// Pushes each batch to a Prometheus remote-write endpoint.
pub struct PrometheusBackend {
    endpoint: Option<Endpoint>,
}

impl PrometheusBackend {
    /// Creates a disabled prometheus backend.
    pub fn new() -> Self {
        Self { endpoint: None }
    }
}

impl Default for PrometheusBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a dotted key onto the `[a-zA-Z_:][a-zA-Z0-9_:]*` metric name grammar.
fn sanitize_metric_name(key: &str) -> String {
    key.char_indices()
        .map(|(i, c)| match c {
            'a'..='z' | 'A'..='Z' | '_' | ':' => c,
            '0'..='9' if i > 0 => c,
            _ => '_',
        })
        .collect()
}

/// Converts a resolved batch to a Prometheus `WriteRequest`.
///
/// Labels are sorted by name, as required by the remote-write protocol.
#[allow(clippy::cast_precision_loss)] // counters above 2^53 lose precision as f64
fn build_write_request(
    entries: &[(&ResolvedKey, u64)],
    time: u32,
    external_labels: &[(String, String)],
) -> proto::WriteRequest {
    let timestamp = i64::from(time) * 1000;

    let timeseries = entries
        .iter()
        .map(|(key, value)| {
            let mut labels = Vec::with_capacity(external_labels.len() + 1);
            labels.push(proto::Label {
                name: "__name__".to_string(),
                value: String::from_utf8_lossy(key.as_bytes()).into_owned(),
            });
            for (name, value) in external_labels {
                labels.push(proto::Label {
                    name: name.clone(),
                    value: value.clone(),
                });
            }
            labels.sort_by(|a, b| a.name.cmp(&b.name));

            proto::TimeSeries {
                labels,
                samples: vec![proto::Sample {
                    value: *value as f64,
                    timestamp,
                }],
            }
        })
        .collect();

    proto::WriteRequest { timeseries }
}

/// Serializes and snappy-compresses a `WriteRequest`.
fn encode(request: &proto::WriteRequest) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::with_capacity(request.encoded_len());
    request.encode(&mut buf).map_err(|e| BackendError::Remote {
        backend: NAME.to_string(),
        reason: format!("failed to serialize write request: {e}"),
    })?;

    snap::raw::Encoder::new()
        .compress_vec(&buf)
        .map_err(|e| BackendError::Remote {
            backend: NAME.to_string(),
            reason: format!("failed to compress write request: {e}"),
        })
}

/// Sends the payload, retrying with exponential backoff up to `retries` times.
fn send_with_retry(endpoint: &Endpoint, body: &[u8]) -> Result<(), BackendError> {
    let mut last_error = String::new();
    let mut backoff = Duration::from_millis(100);

    for attempt in 0..=endpoint.options.retries {
        let request = endpoint
            .client
            .post(&endpoint.options.url)
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0");

        match request.body(body.to_vec()).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().unwrap_or_default();
                last_error = format!("server returned status {status}: {text}");
            }
            Err(e) => last_error = format!("HTTP request failed: {e}"),
        }

        if attempt < endpoint.options.retries {
            tracing::debug!("prometheus write attempt {} failed: {last_error}", attempt + 1);
            std::thread::sleep(backoff);
            backoff *= 2;
        }
    }

    Err(BackendError::Remote {
        backend: NAME.to_string(),
        reason: last_error,
    })
}

impl Backend for PrometheusBackend {
    fn id(&self) -> BackendId {
        BackendId::PROMETHEUS
    }

    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, options: &str) -> Result<(), BackendError> {
        let options: PrometheusOptions = parse_options(NAME, options)?;

        reqwest::Url::parse(&options.url).map_err(|e| BackendError::InvalidOptions {
            backend: NAME.to_string(),
            reason: format!("invalid url '{}': {e}", options.url),
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .map_err(|e| BackendError::Remote {
                backend: NAME.to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        self.endpoint = Some(Endpoint { options, client });
        Ok(())
    }

    fn disable(&mut self) {
        self.endpoint = None;
    }

    fn resolve(&mut self, key: &str) -> Result<ResolvedKey, BackendError> {
        if key.is_empty() {
            return Err(BackendError::Resolve {
                backend: NAME.to_string(),
                key: key.to_string(),
                reason: "metric names cannot be empty".to_string(),
            });
        }
        Ok(ResolvedKey::new(sanitize_metric_name(key)))
    }

    fn write_batch(&mut self, entries: &[(&ResolvedKey, u64)], time: u32) -> Result<(), BackendError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| BackendError::NotEnabled {
            backend: NAME.to_string(),
        })?;

        if entries.is_empty() {
            return Ok(());
        }

        let request = build_write_request(entries, time, &endpoint.options.labels);
        let body = encode(&request)?;
        send_with_retry(endpoint, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_metric_name() {
        assert_eq!(sanitize_metric_name("systems.services.tsk"), "systems_services_tsk");
        assert_eq!(sanitize_metric_name("9lives"), "_lives");
        assert_eq!(sanitize_metric_name("a9:b-c"), "a9:b_c");
    }

    #[test]
    fn test_options_parse_labels() {
        let opts: PrometheusOptions =
            parse_options(NAME, "-u http://localhost:9090/api/v1/write -l instance=a -l dc=east").unwrap();
        assert_eq!(opts.retries, 0);
        assert_eq!(opts.timeout_ms, 30_000);
        assert_eq!(
            opts.labels,
            vec![
                ("instance".to_string(), "a".to_string()),
                ("dc".to_string(), "east".to_string()),
            ]
        );

        assert!(parse_options::<PrometheusOptions>(NAME, "-u http://x -l nolabel").is_err());
        assert!(parse_options::<PrometheusOptions>(NAME, "").is_err());
    }

    #[test]
    fn test_enable_rejects_bad_url() {
        let mut backend = PrometheusBackend::new();
        let err = backend.enable("-u not-a-url").unwrap_err();
        assert!(matches!(err, BackendError::InvalidOptions { .. }));
        assert!(backend.endpoint.is_none());
    }

    #[test]
    fn test_build_write_request() {
        let a = ResolvedKey::new("cpu_usage");
        let b = ResolvedKey::new("mem_usage");
        let external = vec![("instance".to_string(), "vmm_1".to_string())];

        let request = build_write_request(&[(&a, 85), (&b, 12)], 1_700_000_000, &external);

        assert_eq!(request.timeseries.len(), 2);
        let ts = &request.timeseries[0];
        assert_eq!(ts.labels[0].name, "__name__");
        assert_eq!(ts.labels[0].value, "cpu_usage");
        assert_eq!(ts.labels[1].name, "instance");
        assert_eq!(ts.samples[0].value, 85.0);
        assert_eq!(ts.samples[0].timestamp, 1_700_000_000_000);
        assert_eq!(request.timeseries[1].samples[0].timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_encode_decodes_back() {
        let key = ResolvedKey::new("test");
        let request = build_write_request(&[(&key, 42)], 10, &[]);

        let compressed = encode(&request).unwrap();
        let decompressed = snap::raw::Decoder::new().decompress_vec(&compressed).unwrap();
        let decoded = proto::WriteRequest::decode(decompressed.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_write_to_unreachable_endpoint_fails() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut backend = PrometheusBackend::new();
        backend
            .enable(&format!("-u http://127.0.0.1:{port}/api/v1/write -t 500"))
            .unwrap();
        let key = backend.resolve("x").unwrap();
        let err = backend.write_batch(&[(&key, 1)], 1).unwrap_err();
        assert!(matches!(err, BackendError::Remote { .. }));
    }
}
