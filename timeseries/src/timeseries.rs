//! The orchestrator: owns the backend registry and creates key packages.
//!
//! Backends are enabled on a `&mut Timeseries` before any key package is
//! created. Key packages borrow the orchestrator, so the compiler rejects
//! enabling or disabling backends while a package could be flushing.

use crate::backend::BackendId;
use crate::error::Result;
use crate::keypackage::{KeyPackage, KeyPackageFlags};
use crate::registry::{BackendRegistry, RegisteredBackend};

/// Entry point of the runtime.
#[derive(Debug, Default)]
pub struct Timeseries {
    registry: BackendRegistry,
}

impl Timeseries {
    /// Creates an orchestrator with every compiled-in backend, all disabled.
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::builtin())
    }

    /// Creates an orchestrator over a caller-assembled registry.
    pub fn with_registry(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    /// The backend registry.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Enables a backend with a backend-specific option string.
    ///
    /// # Errors
    ///
    /// See [`BackendRegistry::enable`]. A failure leaves the backend disabled
    /// (or, if it was already enabled, unchanged).
    pub fn enable_backend(&mut self, id: BackendId, options: &str) -> Result<()> {
        self.registry.enable(id, options)
    }

    /// Disables a backend.
    ///
    /// # Errors
    ///
    /// See [`BackendRegistry::disable`].
    pub fn disable_backend(&mut self, id: BackendId) -> Result<()> {
        self.registry.disable(id)
    }

    /// Looks up a backend by id.
    pub fn get_backend_by_id(&self, id: BackendId) -> Option<&RegisteredBackend> {
        self.registry.get_by_id(id)
    }

    /// Looks up a backend by name.
    pub fn get_backend_by_name(&self, name: &str) -> Option<&RegisteredBackend> {
        self.registry.get_by_name(name)
    }

    /// Every registered backend, enabled or not, in ascending id order.
    pub fn get_all_backends(&self) -> Vec<&RegisteredBackend> {
        self.registry.all().collect()
    }

    /// Every enabled backend in ascending id order.
    pub fn enabled_backends(&self) -> Vec<&RegisteredBackend> {
        self.registry.enabled()
    }

    /// Creates an empty key package.
    ///
    /// `reset` zeroes values after every flush; `disable` makes new keys
    /// start disabled.
    pub fn new_key_package(&self, reset: bool, disable: bool) -> KeyPackage<'_> {
        let mut flags = KeyPackageFlags::empty();
        flags.set(KeyPackageFlags::RESET, reset);
        flags.set(KeyPackageFlags::DISABLE, disable);
        self.new_key_package_with(flags)
    }

    /// Creates an empty key package with explicit flags.
    pub fn new_key_package_with(&self, flags: KeyPackageFlags) -> KeyPackage<'_> {
        KeyPackage::new(self, flags)
    }

    /// Writes one value for one key to every enabled backend.
    ///
    /// Equivalent to flushing a throwaway single-key package: nothing about
    /// the key is kept between calls, so it is resolved again every time.
    ///
    /// # Errors
    ///
    /// Returns [`TimeseriesError::Flush`](crate::TimeseriesError::Flush) if
    /// any backend failed to resolve or write the value.
    pub fn set_single(&self, name: &str, value: u64, time: u32) -> Result<()> {
        let mut kp = self.new_key_package_with(KeyPackageFlags::empty());
        let idx = kp.add_key(name);
        kp.set(idx, value);
        kp.flush(time)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[test]
    fn test_new_has_builtin_backends() {
        let ts = Timeseries::new();
        let names: Vec<&str> = ts.get_all_backends().iter().map(|b| b.name()).collect();
        assert!(names.starts_with(&["ascii", "graphite"]));
        assert!(ts.enabled_backends().is_empty());
        assert!(ts.get_backend_by_name("missing").is_none());
    }

    #[test]
    fn test_new_key_package_flags() {
        let ts = Timeseries::new();
        assert_eq!(ts.new_key_package(false, false).flags(), KeyPackageFlags::empty());
        assert_eq!(ts.new_key_package(true, false).flags(), KeyPackageFlags::RESET);
        assert_eq!(
            ts.new_key_package(true, true).flags(),
            KeyPackageFlags::RESET | KeyPackageFlags::DISABLE
        );
    }

    #[test]
    fn test_set_single_resolves_every_call() {
        let backend = MemoryBackend::new(BackendId(6), "memory");
        let sink = backend.sink();
        let mut registry = BackendRegistry::empty();
        registry.register(Box::new(backend)).unwrap();
        let mut ts = Timeseries::with_registry(registry);
        ts.enable_backend(BackendId(6), "").unwrap();

        ts.set_single("a.test.key", 12345, 532_051_200).unwrap();
        ts.set_single("a.test.key", 6, 532_051_260).unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].time, 532_051_200);
        assert_eq!(batches[0].entries, vec![("a.test.key".to_string(), 12345)]);
        assert_eq!(batches[1].entries, vec![("a.test.key".to_string(), 6)]);
        assert_eq!(sink.resolved_keys(), vec!["a.test.key", "a.test.key"]);
    }
}
