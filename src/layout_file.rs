//! Layout files: a JSON description of a subvolume topology.
//!
//! ```json
//! {
//!   "subvolumes": [
//!     { "name": "@", "mount": "/" },
//!     { "name": "@home", "mount": "/home", "parent": "@" }
//!   ]
//! }
//! ```
//!
//! Entries are declared in file order, so a parent has to appear before its
//! children. Every declaration error surfaces before a plan is built.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TopologyError;
use crate::topology::Topology;

/// Serialized form of a `Topology`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutFile {
    pub subvolumes: Vec<SubvolumeEntry>,
}

/// One subvolume declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubvolumeEntry {
    pub name: String,
    pub mount: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl LayoutFile {
    /// Capture a topology in declaration order.
    pub fn from_topology(topology: &Topology) -> Self {
        let subvolumes = topology
            .iter()
            .map(|sv| SubvolumeEntry {
                name: sv.name.clone(),
                mount: sv.mount_path.clone(),
                parent: sv.parent.clone(),
            })
            .collect();
        Self { subvolumes }
    }

    /// Declare every entry, in order, into a fresh topology.
    pub fn to_topology(&self) -> Result<Topology, TopologyError> {
        let mut topology = Topology::new();
        for entry in &self.subvolumes {
            topology.declare(&entry.name, &entry.mount, entry.parent.as_deref())?;
        }
        Ok(topology)
    }

    /// Save layout to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize layout")?;
        fs::write(path.as_ref(), json + "\n")
            .with_context(|| format!("Failed to write layout file: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Load layout from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read layout file: {}", path.as_ref().display()))?;
        let layout: LayoutFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse layout file: {}", path.as_ref().display()))?;
        Ok(layout)
    }
}

/// Load a layout file and declare it, attaching the file name to any error.
pub fn load_topology<P: AsRef<Path>>(path: P) -> Result<Topology> {
    let layout = LayoutFile::load_from_file(path.as_ref())?;
    let topology = layout
        .to_topology()
        .with_context(|| format!("Invalid layout in {}", path.as_ref().display()))?;
    Ok(topology)
}
