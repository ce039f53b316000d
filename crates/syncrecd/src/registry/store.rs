//! JSON file persistence for the device list.
//!
//! The file holds a JSON array of descriptors:
//!
//! ```json
//! [{"ip": "192.168.1.20", "port": 4455, "password": "secret", "name": "Stage"}]
//! ```
//!
//! Saves go through a temporary file in the same directory followed by a
//! rename, so a crash mid-write leaves the previous list intact.

use std::fs;
use std::io;
use std::path::PathBuf;

use syncrec_core::DeviceDescriptor;
use thiserror::Error;
use tracing::debug;

/// Errors from loading or saving the device list.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Device file {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode device list: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Location of the persisted device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    /// Creates a store backed by `path`. Nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the device list. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<DeviceDescriptor>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No device file yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes the device list, replacing the previous file atomically.
    pub fn save(&self, devices: &[DeviceDescriptor]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(devices)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), count = devices.len(), "Device list saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "devices.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
