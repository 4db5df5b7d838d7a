//! Key packages: named metric slots flushed together at one timestamp.
//!
//! A [`KeyPackage`] maps metric names to stable indices, keeps a `u64` value
//! and an enabled flag per index, and caches the identifier each backend
//! resolved for each key.
//!
//! # Flush Protocol
//!
//! 1. Every (key, enabled backend) pair not yet resolved is resolved and cached
//! 2. Each enabled backend receives one batch of its resolved identifiers and
//!    current values, restricted to enabled keys, all stamped with the same time
//! 3. A failing backend does not stop the others; the flush reports failure if
//!    any backend failed
//! 4. With [`KeyPackageFlags::RESET`], every value is zeroed after the backend
//!    loop, whether or not the writes succeeded
//!
//! # Example
//!
//! ```rust,no_run
//! use timeseries::{BackendId, Timeseries};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ts = Timeseries::new();
//! ts.enable_backend(BackendId::ASCII, "")?;
//!
//! let mut kp = ts.new_key_package(true, false);
//! let requests = kp.add_key("web.requests");
//! let errors = kp.add_key("web.errors");
//!
//! kp.set(requests, 1200);
//! kp.set(errors, 3);
//! kp.flush(1_700_000_000)?;
//!
//! // RESET zeroed the values after the flush.
//! assert_eq!(kp.get(requests), 0);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! A key package has a single owner. Mutating methods take `&mut self`, so
//! sharing one package between threads requires external synchronization.
//! Independent packages over the same [`Timeseries`] can flush concurrently.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::backend::{MAX_BACKEND_ID, ResolvedKey};
use crate::error::{BackendFailure, FlushError, ResolveError};
use crate::registry::RegisteredBackend;
use crate::timeseries::Timeseries;

bitflags! {
    /// Creation-time behavior of a [`KeyPackage`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyPackageFlags: u8 {
        /// Zero every value after each flush.
        const RESET = 0x1;
        /// Newly added keys start disabled.
        const DISABLE = 0x2;
    }
}

/// A set of metric keys, their current values, and per-backend resolution state.
///
/// Indices are assigned in registration order and never change or get
/// reused, even when a key is disabled.
pub struct KeyPackage<'ts> {
    ts: &'ts Timeseries,
    flags: KeyPackageFlags,
    keys: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<u64>,
    enabled: Vec<bool>,
    enabled_count: usize,
    /// Per backend id, the resolved identifier of each key (shorter than
    /// `keys` until the backend has seen the newest keys).
    resolved: [Vec<Option<ResolvedKey>>; MAX_BACKEND_ID],
}

impl<'ts> KeyPackage<'ts> {
    pub(crate) fn new(ts: &'ts Timeseries, flags: KeyPackageFlags) -> Self {
        Self {
            ts,
            flags,
            keys: Vec::new(),
            index: HashMap::new(),
            values: Vec::new(),
            enabled: Vec::new(),
            enabled_count: 0,
            resolved: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// The flags this package was created with.
    pub fn flags(&self) -> KeyPackageFlags {
        self.flags
    }

    /// Adds a key and returns its index.
    ///
    /// If the key is already present its existing index is returned and
    /// nothing changes. New keys start with value 0, enabled unless the
    /// package was created with [`KeyPackageFlags::DISABLE`], and unresolved
    /// against every backend.
    pub fn add_key(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }

        let idx = self.keys.len();
        let enabled = !self.flags.contains(KeyPackageFlags::DISABLE);

        self.keys.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.values.push(0);
        self.enabled.push(enabled);
        if enabled {
            self.enabled_count += 1;
        }
        idx
    }

    /// Returns the index of `name`, or `None` if it was never added.
    pub fn get_key(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the name registered at `index`.
    pub fn key_name(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// Iterates `(index, name)` for every key in index order.
    pub fn keys(&self) -> impl Iterator<Item = (usize, &str)> {
        self.keys.iter().map(String::as_str).enumerate()
    }

    /// Includes the key in subsequent flushes.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never issued by [`add_key`](Self::add_key).
    pub fn enable_key(&mut self, index: usize) {
        let flag = &mut self.enabled[index];
        if !*flag {
            *flag = true;
            self.enabled_count += 1;
        }
    }

    /// Excludes the key from subsequent flushes. The stored value is kept.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never issued by [`add_key`](Self::add_key).
    pub fn disable_key(&mut self, index: usize) {
        let flag = &mut self.enabled[index];
        if *flag {
            *flag = false;
            self.enabled_count -= 1;
        }
    }

    /// Whether the key at `index` is included in flushes.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never issued by [`add_key`](Self::add_key).
    pub fn is_enabled(&self, index: usize) -> bool {
        self.enabled[index]
    }

    /// Enables every key.
    pub fn enable_all(&mut self) {
        self.enabled.fill(true);
        self.enabled_count = self.enabled.len();
    }

    /// Disables every key.
    pub fn disable_all(&mut self) {
        self.enabled.fill(false);
        self.enabled_count = 0;
    }

    /// Returns the current value of the key at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never issued by [`add_key`](Self::add_key).
    pub fn get(&self, index: usize) -> u64 {
        self.values[index]
    }

    /// Sets the current value of the key at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never issued by [`add_key`](Self::add_key).
    pub fn set(&mut self, index: usize, value: u64) {
        self.values[index] = value;
    }

    /// Number of keys ever added.
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    /// Number of keys currently enabled.
    pub fn enabled_size(&self) -> usize {
        self.enabled_count
    }

    /// Resolves every key against every enabled backend it is not yet
    /// resolved with.
    ///
    /// Calling this ahead of the first [`flush`](Self::flush) keeps name
    /// resolution off the flush path. It is never required for correctness.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] listing each failed (backend, key) pair.
    /// Pairs that did resolve stay resolved; a later call retries only the
    /// failed ones.
    pub fn resolve(&mut self) -> Result<(), ResolveError> {
        let ts = self.ts;
        let backends = ts.registry().enabled();
        let failures = self.resolve_pending(&backends);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ResolveError { failures })
        }
    }

    /// Sends the enabled keys and their values to every enabled backend, all
    /// stamped with `time` (seconds since the Unix epoch).
    ///
    /// Unresolved pairs are resolved first. A key that fails to resolve
    /// against a backend is left out of that backend's batch. Every enabled
    /// backend is attempted even after an earlier one failed.
    ///
    /// With [`KeyPackageFlags::RESET`] all values are zeroed afterwards,
    /// including when writes failed.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError`] if any backend failed to resolve or write.
    /// Other backends may have recorded the batch.
    pub fn flush(&mut self, time: u32) -> Result<(), FlushError> {
        let ts = self.ts;
        let backends = ts.registry().enabled();
        let mut failures = self.resolve_pending(&backends);

        for backend in &backends {
            let cache = &self.resolved[backend.id().index()];
            let mut batch = Vec::with_capacity(self.enabled_count);
            for (idx, resolved) in cache.iter().enumerate() {
                if !self.enabled[idx] {
                    continue;
                }
                if let Some(key) = resolved {
                    batch.push((key, self.values[idx]));
                }
            }

            if let Err(error) = backend.plugin().write_batch(&batch, time) {
                tracing::warn!("flush to backend '{}' failed: {error}", backend.name());
                failures.push(BackendFailure {
                    backend: backend.name().to_string(),
                    error,
                });
            }
        }

        if self.flags.contains(KeyPackageFlags::RESET) {
            self.values.fill(0);
        }

        tracing::debug!(
            "flushed {} of {} keys at {time} to {} backend(s), {} failure(s)",
            self.enabled_count,
            self.keys.len(),
            backends.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlushError { failures })
        }
    }

    /// Resolves every unresolved (key, backend) pair, collecting failures.
    fn resolve_pending(&mut self, backends: &[&RegisteredBackend]) -> Vec<BackendFailure> {
        let mut failures = Vec::new();

        for backend in backends {
            let cache = &mut self.resolved[backend.id().index()];
            cache.resize(self.keys.len(), None);
            if cache.iter().all(Option::is_some) {
                continue;
            }

            let mut plugin = backend.plugin();
            let mut resolved = 0usize;
            for (slot, name) in cache.iter_mut().zip(&self.keys) {
                if slot.is_some() {
                    continue;
                }
                match plugin.resolve(name) {
                    Ok(key) => {
                        *slot = Some(key);
                        resolved += 1;
                    }
                    Err(error) => {
                        tracing::warn!("backend '{}' failed to resolve '{name}': {error}", backend.name());
                        failures.push(BackendFailure {
                            backend: backend.name().to_string(),
                            error,
                        });
                    }
                }
            }
            tracing::debug!("resolved {resolved} key(s) against backend '{}'", backend.name());
        }

        failures
    }
}

impl std::fmt::Debug for KeyPackage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPackage")
            .field("flags", &self.flags)
            .field("size", &self.size())
            .field("enabled_size", &self.enabled_size())
            .finish_non_exhaustive()
    }
}
