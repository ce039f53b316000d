//! Durable device registry.
//!
//! The registry is the ordered list of known devices, keyed by `(host, port)`.
//! It is owned by the pool actor and never shared, so it needs no locking.
//! Every mutation is written through to the [`DeviceStore`] when one is
//! attached; a failed write is logged and the in-memory change stands.

mod store;

pub use store::{DeviceStore, StoreError};

use syncrec_core::{DeviceDescriptor, DeviceKey, DomainError};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from registry mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Device {0} is already registered")]
    DuplicateDevice(DeviceKey),

    #[error("Invalid device: {0}")]
    InvalidDevice(#[from] DomainError),
}

/// Ordered collection of device descriptors with unique keys.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    store: Option<DeviceStore>,
    persist_error: Option<String>,
}

impl DeviceRegistry {
    /// Creates an empty registry that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a registry backed by `store`, loading what it holds.
    ///
    /// An unreadable or corrupt file yields an empty registry; the error is
    /// logged and the file is left alone until the next mutation.
    pub fn load(store: DeviceStore) -> Self {
        let devices = match store.load() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Failed to load device list, starting empty");
                Vec::new()
            }
        };

        let mut registry = Self {
            devices: Vec::with_capacity(devices.len()),
            store: Some(store),
            persist_error: None,
        };

        // Later duplicates and invalid entries in a hand-edited file are dropped.
        for device in devices {
            if let Err(e) = registry.insert(device) {
                warn!(error = %e, "Skipping device from file");
            }
        }

        info!(count = registry.len(), "Device registry loaded");
        registry
    }

    /// Adds a device and persists the list.
    pub fn add(&mut self, descriptor: DeviceDescriptor) -> Result<(), RegistryError> {
        self.insert(descriptor)?;
        self.persist();
        Ok(())
    }

    /// Removes the device with `key`, persisting if it was present.
    pub fn remove(&mut self, key: &DeviceKey) -> Option<DeviceDescriptor> {
        let index = self.devices.iter().position(|d| d.has_key(key))?;
        let removed = self.devices.remove(index);
        self.persist();
        Some(removed)
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.has_key(key))
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.get(key).is_some()
    }

    /// All descriptors in insertion order.
    pub fn list(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Takes the error from the most recent failed write, if any.
    pub fn take_persist_error(&mut self) -> Option<String> {
        self.persist_error.take()
    }

    fn insert(&mut self, descriptor: DeviceDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;

        let key = descriptor.key();
        if self.contains(&key) {
            return Err(RegistryError::DuplicateDevice(key));
        }

        self.devices.push(descriptor);
        Ok(())
    }

    fn persist(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.save(&self.devices) {
            Ok(()) => self.persist_error = None,
            Err(e) => {
                warn!(error = %e, "Failed to persist device list");
                self.persist_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn device(host: &str, port: u16) -> DeviceDescriptor {
        DeviceDescriptor::new(host, port, "", host.to_uppercase())
    }

    #[test]
    fn test_add_rejects_duplicate_key() {
        let mut registry = DeviceRegistry::in_memory();
        registry.add(device("host1", 1)).unwrap();

        let dup = DeviceDescriptor::new("host1", 1, "other", "Other name");
        assert_eq!(
            registry.add(dup).unwrap_err(),
            RegistryError::DuplicateDevice(DeviceKey::new("host1", 1))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].name, "HOST1");
    }

    #[test]
    fn test_same_host_different_port_is_distinct() {
        let mut registry = DeviceRegistry::in_memory();
        registry.add(device("host1", 1)).unwrap();
        registry.add(device("host1", 2)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_add_rejects_invalid_descriptor() {
        let mut registry = DeviceRegistry::in_memory();
        let err = registry.add(device("", 4455)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDevice(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = DeviceRegistry::in_memory();
        registry.add(device("host1", 1)).unwrap();
        assert!(registry.remove(&DeviceKey::new("host9", 9)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mutations_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let mut registry = DeviceRegistry::load(DeviceStore::new(&path));
        registry.add(device("host1", 1)).unwrap();
        registry.add(device("host2", 2)).unwrap();
        registry.remove(&DeviceKey::new("host1", 1));

        let reloaded = DeviceRegistry::load(DeviceStore::new(&path));
        assert_eq!(reloaded.list(), &[device("host2", 2)]);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "[{").unwrap();

        let registry = DeviceRegistry::load(DeviceStore::new(&path));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_write_keeps_change_and_reports() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("devices.json");
        std::fs::create_dir(&path).unwrap();

        let mut registry = DeviceRegistry::load(DeviceStore::new(&path));
        registry.add(device("host1", 1)).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.take_persist_error().is_some());
        assert!(registry.take_persist_error().is_none());
    }

    #[test]
    fn test_duplicates_in_file_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devices.json");
        DeviceStore::new(&path)
            .save(&[device("host1", 1), device("host1", 1), device("host2", 2)])
            .unwrap();

        let registry = DeviceRegistry::load(DeviceStore::new(&path));
        assert_eq!(registry.len(), 2);
    }
}
