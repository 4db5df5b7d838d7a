//! Backend plugin boundary.
//!
//! A backend is a sink that records batches of `(key, value)` pairs sharing a
//! single timestamp. The runtime talks to backends through the [`Backend`]
//! trait only:
//!
//! 1. [`Backend::enable`] parses a free-form option string
//! 2. [`Backend::resolve`] turns a key name into an opaque [`ResolvedKey`]
//! 3. [`Backend::write_batch`] records resolved keys and values for one time
//!
//! Resolution is expected to be more expensive than a write. Key packages
//! cache resolved keys and only resolve each (key, backend) pair once.
//!
//! # Option strings
//!
//! Built-in backends parse their option strings getopt-style with [`clap`]
//! (see [`parse_options`]). The string is split on whitespace; quoting is not
//! supported, so paths containing spaces cannot be expressed.
//!
//! # Built-in backends
//!
//! | id | name         | module         |
//! |----|--------------|----------------|
//! | 1  | `ascii`      | [`ascii`]      |
//! | 2  | `graphite`   | [`graphite`]   |
//! | 3  | `prometheus` | `prometheus` (feature `prometheus-remote-write`) |
//!
//! [`memory::MemoryBackend`] has no fixed id; embedders register it with an
//! id of their choosing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub mod ascii;
pub mod graphite;
pub mod memory;
#[cfg(feature = "prometheus-remote-write")]
pub mod prometheus;

/// Exclusive upper bound on backend ids; also the backend table length.
pub const MAX_BACKEND_ID: usize = 8;

/// Small, dense identifier of a backend slot in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(pub u8);

impl BackendId {
    /// The `ascii` backend.
    pub const ASCII: Self = Self(1);
    /// The `graphite` backend.
    pub const GRAPHITE: Self = Self(2);
    /// The `prometheus` remote-write backend.
    pub const PROMETHEUS: Self = Self(3);

    /// Returns the id as a table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-specific identifier for a key, produced by [`Backend::resolve`].
///
/// The contents are opaque to the runtime. Text backends typically store a
/// precomputed prefix of the line they emit for the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedKey(Box<[u8]>);

impl ResolvedKey {
    /// Wraps backend-produced bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into_boxed_slice())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the bytes as UTF-8, if they are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

/// A pluggable sink for flushed values.
///
/// Implementations are owned by the [`BackendRegistry`](crate::BackendRegistry)
/// for the life of the process and are only ever called while the registry
/// holds the backend's lock, so `&mut self` methods never race.
pub trait Backend: Send {
    /// Stable id of the backend's registry slot.
    fn id(&self) -> BackendId;

    /// Human-readable, unique name.
    fn name(&self) -> &str;

    /// Parses `options` and acquires whatever the backend needs to write.
    ///
    /// On failure the backend must be left as it was before the call.
    ///
    /// # Errors
    ///
    /// [`BackendError::InvalidOptions`] for malformed options,
    /// [`BackendError::Unavailable`] when a file, socket or endpoint cannot be
    /// opened.
    fn enable(&mut self, options: &str) -> Result<(), BackendError>;

    /// Releases resources acquired by [`enable`](Self::enable).
    fn disable(&mut self) {}

    /// Produces the identifier the backend uses to write `key`.
    ///
    /// # Errors
    ///
    /// [`BackendError::Resolve`] if the key cannot be represented.
    fn resolve(&mut self, key: &str) -> Result<ResolvedKey, BackendError>;

    /// Records every entry at `time` (seconds since the Unix epoch).
    ///
    /// # Errors
    ///
    /// [`BackendError::Write`] or [`BackendError::Remote`] if the batch could
    /// not be recorded. Part of the batch may have been written.
    fn write_batch(&mut self, entries: &[(&ResolvedKey, u64)], time: u32) -> Result<(), BackendError>;
}

/// Parses a backend option string into a `clap` options struct.
///
/// The backend name is used as the program name so clap's error messages
/// read naturally (`error: unexpected argument '-x' ... Usage: ascii [OPTIONS]`).
///
/// # Errors
///
/// Returns [`BackendError::InvalidOptions`] with clap's rendered message.
pub fn parse_options<T: clap::Parser>(backend: &str, options: &str) -> Result<T, BackendError> {
    let args = std::iter::once(backend).chain(options.split_whitespace());
    T::try_parse_from(args).map_err(|e| BackendError::InvalidOptions {
        backend: backend.to_string(),
        reason: e.render().to_string().trim_end().to_string(),
    })
}

/// Returns every backend compiled into this build, all disabled.
pub fn builtin() -> Vec<Box<dyn Backend>> {
    let mut backends: Vec<Box<dyn Backend>> = vec![
        Box::new(ascii::AsciiBackend::new()),
        Box::new(graphite::GraphiteBackend::new()),
    ];
    #[cfg(feature = "prometheus-remote-write")]
    backends.push(Box::new(prometheus::PrometheusBackend::new()));
    backends
}
