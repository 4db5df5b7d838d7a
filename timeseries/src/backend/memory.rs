//! In-process backend that keeps every flushed batch in memory.
//!
//! Useful for embedders that want to observe what a key package emits, and
//! for tests. The [`MemorySink`] handle is cheap to clone and stays readable
//! after the backend has been moved into a registry.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Backend, BackendId, ResolvedKey};
use crate::error::BackendError;

/// One recorded `write_batch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The flush timestamp shared by every entry.
    pub time: u32,
    /// `(key, value)` pairs in the order they were written.
    pub entries: Vec<(String, u64)>,
}

#[derive(Debug, Default)]
struct SinkState {
    batches: Vec<Batch>,
    resolved: Vec<String>,
    options: Option<String>,
}

/// Shared view of what a [`MemoryBackend`] has received.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    /// Returns every batch written so far.
    pub fn batches(&self) -> Vec<Batch> {
        self.state.lock().batches.clone()
    }

    /// Returns the most recent batch, if any.
    pub fn last_batch(&self) -> Option<Batch> {
        self.state.lock().batches.last().cloned()
    }

    /// Returns every key passed to `resolve`, in call order.
    pub fn resolved_keys(&self) -> Vec<String> {
        self.state.lock().resolved.clone()
    }

    /// Returns the option string the backend was last enabled with.
    pub fn options(&self) -> Option<String> {
        self.state.lock().options.clone()
    }

    /// Forgets all recorded batches and resolutions.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.batches.clear();
        state.resolved.clear();
    }
}

/// Backend that records batches into a [`MemorySink`].
pub struct MemoryBackend {
    id: BackendId,
    name: String,
    enabled: bool,
    sink: MemorySink,
}

impl MemoryBackend {
    /// Creates a disabled memory backend for the given registry slot.
    pub fn new(id: BackendId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: false,
            sink: MemorySink::default(),
        }
    }

    /// Returns a handle to the recorded data.
    pub fn sink(&self) -> MemorySink {
        self.sink.clone()
    }
}

impl Backend for MemoryBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&mut self, options: &str) -> Result<(), BackendError> {
        self.sink.state.lock().options = Some(options.to_string());
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn resolve(&mut self, key: &str) -> Result<ResolvedKey, BackendError> {
        self.sink.state.lock().resolved.push(key.to_string());
        Ok(ResolvedKey::new(key))
    }

    fn write_batch(&mut self, entries: &[(&ResolvedKey, u64)], time: u32) -> Result<(), BackendError> {
        if !self.enabled {
            return Err(BackendError::NotEnabled {
                backend: self.name.clone(),
            });
        }

        let entries = entries
            .iter()
            .map(|(key, value)| {
                let name = String::from_utf8_lossy(key.as_bytes()).into_owned();
                (name, *value)
            })
            .collect();

        self.sink.state.lock().batches.push(Batch { time, entries });
        Ok(())
    }
}
