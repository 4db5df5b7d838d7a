//! Backend registry: a fixed-size table of backend slots addressed by id.
//!
//! The table has [`MAX_BACKEND_ID`] slots for the life of the process. Slots
//! are filled at startup, either with the compiled-in backends
//! ([`BackendRegistry::builtin`]) or with plugins supplied by the embedder
//! ([`BackendRegistry::register`]). Lookups by id are a direct index; lookups
//! by name scan the (small) table.
//!
//! # Enabling
//!
//! [`BackendRegistry::enable`] hands the option string to the plugin. On
//! failure the slot stays disabled. Enabling an already-enabled backend with
//! the same option string is a no-op; with different options it fails with
//! [`BackendError::AlreadyEnabled`] and the backend keeps its current setup.
//! Call [`BackendRegistry::disable`] first to reconfigure.
//!
//! # Thread Safety
//!
//! Each plugin sits behind its own mutex so a shared `&BackendRegistry` can
//! serve key packages on several threads. Enabling and disabling need
//! `&mut self` and therefore cannot overlap with in-flight flushes.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::backend::{self, Backend, BackendId, MAX_BACKEND_ID};
use crate::error::{BackendError, RegistryError, Result};

/// Serializable summary of a registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Registry slot id.
    pub id: BackendId,
    /// Backend name.
    pub name: String,
    /// Whether the backend currently receives flushes.
    pub enabled: bool,
}

/// A backend slot owned by the registry.
pub struct RegisteredBackend {
    id: BackendId,
    name: String,
    options: Option<String>,
    plugin: Mutex<Box<dyn Backend>>,
}

impl RegisteredBackend {
    /// Registry slot id.
    pub fn id(&self) -> BackendId {
        self.id
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the backend is enabled.
    pub fn is_enabled(&self) -> bool {
        self.options.is_some()
    }

    /// The option string the backend was enabled with.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Returns a serializable summary.
    pub fn info(&self) -> BackendInfo {
        BackendInfo {
            id: self.id,
            name: self.name.clone(),
            enabled: self.is_enabled(),
        }
    }

    /// Locks the plugin for a resolve or write call.
    pub(crate) fn plugin(&self) -> MutexGuard<'_, Box<dyn Backend>> {
        self.plugin.lock()
    }
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Fixed-length table of backend slots.
#[derive(Debug)]
pub struct BackendRegistry {
    slots: [Option<RegisteredBackend>; MAX_BACKEND_ID],
}

impl BackendRegistry {
    /// Creates a registry with no backends.
    pub fn empty() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Creates a registry holding every compiled-in backend, all disabled.
    ///
    /// # Panics
    ///
    /// Panics if two built-in backends share an id or name, which is a build
    /// configuration bug.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for plugin in backend::builtin() {
            if let Err(e) = registry.register(plugin) {
                panic!("built-in backend table is inconsistent: {e}");
            }
        }
        registry
    }

    /// Adds a plugin to the slot named by its id.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::IdOutOfRange`] if the id does not fit the table
    /// - [`RegistryError::DuplicateId`] if the slot is taken
    /// - [`RegistryError::DuplicateName`] if another backend has the same name
    pub fn register(&mut self, plugin: Box<dyn Backend>) -> Result<()> {
        let id = plugin.id();
        let name = plugin.name().to_string();

        if id.index() >= MAX_BACKEND_ID {
            return Err(RegistryError::IdOutOfRange {
                id,
                max: MAX_BACKEND_ID,
            }
            .into());
        }
        if self.slots[id.index()].is_some() {
            return Err(RegistryError::DuplicateId { id }.into());
        }
        if self.get_by_name(&name).is_some() {
            return Err(RegistryError::DuplicateName { name }.into());
        }

        self.slots[id.index()] = Some(RegisteredBackend {
            id,
            name,
            options: None,
            plugin: Mutex::new(plugin),
        });
        Ok(())
    }

    /// Enables a backend with a backend-specific option string.
    ///
    /// If the backend is already enabled with exactly `options`, the string
    /// is trusted as-is: it is not re-parsed and the plugin's
    /// [`Backend::enable`] is not called again.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownBackend`] if no backend has this id
    /// - [`BackendError::AlreadyEnabled`] if enabled with different options
    /// - any error the plugin returns from [`Backend::enable`]
    pub fn enable(&mut self, id: BackendId, options: &str) -> Result<()> {
        let slot = self.slot_mut(id)?;

        if let Some(current) = &slot.options {
            if current == options {
                return Ok(());
            }
            return Err(BackendError::AlreadyEnabled {
                backend: slot.name.clone(),
                current: current.clone(),
            }
            .into());
        }

        slot.plugin.get_mut().enable(options)?;
        slot.options = Some(options.to_string());
        tracing::info!("enabled backend '{}' (id {}) with options '{options}'", slot.name, slot.id);
        Ok(())
    }

    /// Disables a backend. Disabling a disabled backend is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownBackend`] if no backend has this id.
    pub fn disable(&mut self, id: BackendId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.options.take().is_some() {
            slot.plugin.get_mut().disable();
            tracing::info!("disabled backend '{}' (id {})", slot.name, slot.id);
        }
        Ok(())
    }

    /// Looks up a backend by id.
    pub fn get_by_id(&self, id: BackendId) -> Option<&RegisteredBackend> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Looks up a backend by name.
    pub fn get_by_name(&self, name: &str) -> Option<&RegisteredBackend> {
        self.all().find(|b| b.name == name)
    }

    /// Iterates every registered backend in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = &RegisteredBackend> {
        self.slots.iter().flatten()
    }

    /// Snapshot of every enabled backend in ascending id order.
    pub fn enabled(&self) -> Vec<&RegisteredBackend> {
        self.all().filter(|b| b.is_enabled()).collect()
    }

    fn slot_mut(&mut self, id: BackendId) -> Result<&mut RegisteredBackend> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| RegistryError::UnknownBackend { id }.into())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
