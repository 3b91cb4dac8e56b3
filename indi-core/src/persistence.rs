//! Snapshot storage for saveable properties
//!
//! The model only needs a `save`/`load` capability keyed by device and
//! property name. [`FileStore`] is the stock implementation: one versioned
//! JSON document per property under a configured base directory.

use crate::element::Element;
use crate::error::{IndiError, IndiResult};
use crate::property::Property;
use crate::types::{PropertyKind, PropertyPermission, PropertyState, SwitchRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Identity of a persisted property
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    device: String,
    property: String,
}

impl PropertyKey {
    /// The device name is reduced to ASCII letters and digits so it is safe
    /// as a file name component
    pub fn new(device: &str, property: &str) -> Self {
        Self {
            device: device.chars().filter(char::is_ascii_alphanumeric).collect(),
            property: property.trim().to_string(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn property(&self) -> &str {
        &self.property
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.device, self.property)
    }
}

/// Save/load capability for saveable properties
#[cfg_attr(test, mockall::automock)]
pub trait PropertyStore: Send + Sync {
    fn save(&self, key: &PropertyKey, property: &Property) -> IndiResult<()>;

    /// Restore a property, `None` when nothing was saved under `key`
    fn load(&self, key: &PropertyKey) -> IndiResult<Option<Property>>;
}

/// On-disk layout of a saved property, decoupled from [`Property`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub version: u32,
    pub device: String,
    pub kind: PropertyKind,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub permission: PropertyPermission,
    pub timeout: u32,
    pub rule: Option<SwitchRule>,
    pub elements: Vec<Element>,
}

impl From<&Property> for PropertySnapshot {
    fn from(property: &Property) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            device: property.device().to_string(),
            kind: property.kind(),
            name: property.name().to_string(),
            label: property.label().to_string(),
            group: property.group().to_string(),
            state: property.state(),
            permission: property.permission(),
            timeout: property.timeout(),
            rule: property.rule(),
            elements: property.elements().to_vec(),
        }
    }
}

impl PropertySnapshot {
    /// Rebuild the property described by this snapshot
    ///
    /// The snapshot goes through the same builder and element constructors
    /// as a fresh property, so a hand-edited file cannot smuggle in what
    /// those reject.
    ///
    /// # Errors
    ///
    /// `Persistence` for an unknown version or any construction error
    /// (empty names, duplicate or mismatched elements, numbers out of range,
    /// a write-only switch)
    pub fn into_property(self) -> IndiResult<Property> {
        if self.version != SNAPSHOT_VERSION {
            return Err(IndiError::Persistence(format!(
                "Unsupported snapshot version {}",
                self.version
            )));
        }

        let invalid = |e: IndiError| {
            IndiError::Persistence(format!("Invalid snapshot {}.{}: {}", self.device, self.name, e))
        };

        let mut builder = Property::builder(self.kind, &self.name)
            .device(&self.device)
            .label(&self.label)
            .group(&self.group)
            .state(self.state)
            .permission(self.permission)
            .timeout(i64::from(self.timeout));
        if let Some(rule) = self.rule {
            builder = builder.rule(rule);
        }
        for element in &self.elements {
            builder = builder.element(element.rebuilt().map_err(invalid)?);
        }

        builder.build().map_err(invalid)
    }
}

/// Stores each property as `<device>_<property>.prop` under a base directory
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, key: &PropertyKey) -> PathBuf {
        self.base_dir.join(format!("{}.prop", key))
    }
}

impl PropertyStore for FileStore {
    fn save(&self, key: &PropertyKey, property: &Property) -> IndiResult<()> {
        fs::create_dir_all(&self.base_dir)?;

        let snapshot = PropertySnapshot::from(property);
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| IndiError::Persistence(e.to_string()))?;

        fs::write(self.path_for(key), json)?;
        log::debug!("Saved property snapshot {}", key);
        Ok(())
    }

    fn load(&self, key: &PropertyKey) -> IndiResult<Option<Property>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: PropertySnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| IndiError::Persistence(format!("{}: {}", path.display(), e)))?;
        snapshot.into_property().map(Some)
    }
}
