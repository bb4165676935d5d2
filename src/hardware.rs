//! Firmware detection
//!
//! Decides whether the machine booted through UEFI or legacy BIOS, which in
//! turn decides whether the plan creates and mounts an EFI system partition.
//!
//! The kernel exposes `/sys/firmware/efi` as a sysfs *directory* only on UEFI
//! boots, so detection checks for a directory, never for a regular file.

use serde::Serialize;
use std::path::Path;
use strum::Display;
use tracing::{info, warn};

/// Detected firmware mode of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    /// UEFI firmware: GPT with an EFI system partition
    #[strum(to_string = "UEFI")]
    Uefi,
    /// Legacy BIOS firmware: GPT with a BIOS boot partition
    #[strum(to_string = "BIOS")]
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

/// Detect firmware mode of the running system.
pub fn detect_firmware_mode() -> FirmwareMode {
    detect_firmware_mode_at(Path::new("/sys"))
}

/// Detect firmware mode against a sysfs mount at `sysfs`.
///
/// A missing `<sysfs>/firmware` usually means a container; that falls back to
/// BIOS with a warning since the ESP steps cannot be justified.
pub fn detect_firmware_mode_at(sysfs: &Path) -> FirmwareMode {
    let efi_dir = sysfs.join("firmware").join("efi");

    if efi_dir.is_dir() {
        info!("UEFI firmware detected ({} exists)", efi_dir.display());
        FirmwareMode::Uefi
    } else {
        if !sysfs.join("firmware").is_dir() {
            warn!(
                "{} is missing; firmware mode cannot be detected, assuming BIOS",
                sysfs.join("firmware").display()
            );
        } else {
            info!("BIOS firmware detected ({} not found)", efi_dir.display());
        }
        FirmwareMode::Bios
    }
}
