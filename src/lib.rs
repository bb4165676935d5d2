//! subvolseq library
//!
//! Declarative btrfs subvolume topology, a pure plan builder, and the
//! confirmation-gated executor that walks the plan against the real system.

pub mod cli;
pub mod engine;
pub mod environment;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod layout_file;
pub mod preflight;
pub mod topology;

// Re-export main types for convenience
pub use engine::plan::{build, PartitionMode, Phase, Plan, PlanOptions, Step, StorageOp};
pub use environment::{DispatchOutcome, DryRunEnvironment, Environment, ShellEnvironment};
pub use error::{PlanError, SequencerError, TopologyError};
pub use executor::{is_confirmation, ExecutionState, Executor, RunReport};
pub use hardware::{detect_firmware_mode, FirmwareMode};
pub use layout_file::LayoutFile;
pub use topology::{Subvolume, Topology};
