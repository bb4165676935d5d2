//! Error handling module for subvolseq
//!
//! Every error here is raised while the topology is declared or the plan is
//! built, before any destructive step can run. Operator refusal at runtime is
//! not an error and never appears in these types.

use std::path::PathBuf;
use thiserror::Error;

/// Rejected `Topology::declare` calls.
///
/// A rejected declaration leaves the topology exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A subvolume with this name was already declared
    #[error("subvolume '{name}' is already declared")]
    DuplicateName { name: String },

    /// The parent's mount path does not strictly contain the child's mount path
    #[error(
        "subvolume '{name}' cannot be mounted at {mount_path} under parent '{parent}' \
         mounted at {parent_mount}"
    )]
    InvalidParent {
        name: String,
        mount_path: PathBuf,
        parent: String,
        parent_mount: PathBuf,
    },

    /// The parent was never declared
    #[error("subvolume '{name}' references undeclared parent '{parent}'")]
    UnknownParent { name: String, parent: String },

    /// Malformed mount path or name, or a second root
    #[error("subvolume '{name}': {reason}")]
    InvalidMountPath { name: String, reason: String },

    /// One name is a directory component of the other on the raw volume
    #[error("subvolume '{name}' overlaps the path of subvolume '{existing}'")]
    NameConflict { name: String, existing: String },

    /// Mounting here would hide, or be hidden by, another subvolume's mount
    #[error(
        "subvolume '{name}' at {mount_path} conflicts with '{other}' mounted at {other_mount}"
    )]
    MountConflict {
        name: String,
        mount_path: PathBuf,
        other: String,
        other_mount: PathBuf,
    },
}

impl TopologyError {
    /// Create an invalid mount path error
    pub fn invalid_mount(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMountPath {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the plan builder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The dependency graph could not be linearized
    #[error("topology cannot be linearized; cycle among: {}", remaining.join(", "))]
    Cycle { remaining: Vec<String> },

    /// No subvolume is mounted at `/`
    #[error("topology declares no root subvolume mounted at /")]
    MissingRoot,

    /// The target disk is not a device node path
    #[error("invalid disk path '{0}': must start with /dev/")]
    InvalidDisk(String),

    /// The ESP size is not an sgdisk size such as `512M`
    #[error("invalid EFI partition size '{0}': expected a number with an optional K/M/G/T suffix")]
    InvalidEspSize(String),
}

/// Main error type for subvolseq
#[derive(Error, Debug)]
pub enum SequencerError {
    /// Topology declaration errors
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Plan building errors
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors (console, layout files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Layout file parsing errors
    #[error("Layout error: {0}")]
    Layout(#[from] serde_json::Error),

    /// Pre-flight environment checks
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),
}

/// Result type alias for subvolseq operations
pub type Result<T> = std::result::Result<T, SequencerError>;

impl SequencerError {
    /// Create a pre-flight error
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }
}
