//! Pre-flight checks for the runtime environment
//!
//! Verified before the first prompt is shown:
//! - Running with root privileges (EUID 0)
//! - Every tool the plan calls is on `PATH`
//! - The target disk exists as a device node
//!
//! A failed check stops the run before anything is offered to the operator.

use crate::engine::plan::{Plan, StorageOp};
use std::env;
use std::path::PathBuf;
use tracing::debug;

/// Result of environment verification
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    /// Set when the plan's disk does not exist
    pub missing_disk: Option<PathBuf>,
}

impl PreflightReport {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root && self.missing_disk.is_none()
    }

    /// One line per failed check.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.is_root {
            problems.push("root privileges required (run with sudo or as root)".to_string());
        }
        for binary in &self.missing_binaries {
            problems.push(format!(
                "missing binary: {} (install: pacman -S {})",
                binary,
                package_for_binary(binary)
            ));
        }
        if let Some(disk) = &self.missing_disk {
            problems.push(format!("disk {} does not exist", disk.display()));
        }
        problems
    }
}

/// Tools invoked by a plan, in first-use order.
pub fn required_binaries(plan: &Plan) -> Vec<&'static str> {
    let mut binaries: Vec<&'static str> = vec!["sh"];
    for step in plan {
        let tools: &[&'static str] = match step.op {
            StorageOp::WipePartitionTable { .. } | StorageOp::CreatePartitions { .. } => &["sgdisk"],
            StorageOp::EditPartitions { .. } => &["cfdisk"],
            StorageOp::FormatEsp { .. } => &["mkfs.fat"],
            StorageOp::FormatBtrfs { .. } => &["mkfs.btrfs"],
            StorageOp::CreateSubvolume { .. } => &["mkdir", "btrfs"],
            StorageOp::CreateDirectories { .. } => &["mkdir"],
            StorageOp::MountRawVolume { .. }
            | StorageOp::MountSubvolume { .. }
            | StorageOp::RebindRoot { .. } => &["mount"],
            StorageOp::MountEsp { .. } => &["mkdir", "mount"],
        };
        for &tool in tools {
            if !binaries.contains(&tool) {
                binaries.push(tool);
            }
        }
    }
    binaries
}

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all checks for `plan` and return the result
pub fn verify_environment(plan: &Plan) -> PreflightReport {
    let missing_binaries = required_binaries(plan)
        .into_iter()
        .filter(|b| !binary_exists(b))
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!("Missing binaries: {:?}", missing_binaries);

    let missing_disk = if plan.disk.exists() {
        None
    } else {
        Some(plan.disk.clone())
    };

    PreflightReport {
        missing_binaries,
        is_root: is_running_as_root(),
        missing_disk,
    }
}

/// Map binary name to the Arch package that provides it
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "sgdisk" => "gptfdisk",
        "cfdisk" | "mount" => "util-linux",
        "mkfs.fat" => "dosfstools",
        "mkfs.btrfs" | "btrfs" => "btrfs-progs",
        "mkdir" => "coreutils",
        "sh" => "bash",
        _ => "unknown",
    }
}
