//! # timeseries
//!
//! Metric emission runtime: named `u64` counters flushed to pluggable backends.
//!
//! Application code registers metric names in a [`KeyPackage`], updates their
//! values by index, and periodically flushes the enabled set, stamped with a
//! single timestamp, to every enabled backend (a text file, a graphite carbon
//! receiver, a Prometheus remote-write endpoint, or a plugin of your own).
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Metric names are resolved to backend identifiers once, then cached
//! - Key indices are stable for the life of a package; disabling keeps storage
//! - One failing backend never prevents the others from receiving a flush
//! - No background threads; `flush` is a synchronous, blocking call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use timeseries::{BackendId, Timeseries};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ts = Timeseries::new();
//! ts.enable_backend(BackendId::ASCII, "-f metrics.txt")?;
//!
//! // A rarely emitted metric
//! ts.set_single("app.started", 1, 1_700_000_000)?;
//!
//! // Metrics updated every tick
//! let mut kp = ts.new_key_package(false, false);
//! let rx = kp.add_key("net.eth0.rx_bytes");
//! let tx = kp.add_key("net.eth0.tx_bytes");
//! kp.resolve()?;
//!
//! for tick in 0..3u32 {
//!     kp.set(rx, 1500 * u64::from(tick));
//!     kp.set(tx, 900 * u64::from(tick));
//!     kp.flush(1_700_000_000 + tick * 60)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Timeseries`]: Top-level handle; owns the backend registry, creates key packages
//! - [`KeyPackage`]: Keys, values, enabled flags, and the resolve/flush protocol
//! - [`BackendRegistry`]: Fixed-size table of backend plugins addressed by [`BackendId`]
//! - [`Backend`]: The plugin trait: enable, resolve, write a batch
//!
//! ## Modules
//!
//! - [`timeseries`]: Orchestrator
//! - [`keypackage`]: Key packages and flush
//! - [`registry`]: Backend registration, enabling, lookup
//! - [`backend`]: Plugin trait and built-in backends
//! - [`error`]: Error types

pub mod backend;
pub mod error;
pub mod keypackage;
pub mod registry;
pub mod timeseries;

// Re-export primary API types at crate root for convenience.
pub use backend::{Backend, BackendId, MAX_BACKEND_ID, ResolvedKey};
pub use error::{BackendError, FlushError, ResolveError, Result, TimeseriesError};
pub use keypackage::{KeyPackage, KeyPackageFlags};
pub use registry::{BackendInfo, BackendRegistry, RegisteredBackend};
pub use timeseries::Timeseries;
