//! Plan Builder
//!
//! Translates a declared `Topology` plus `PlanOptions` into an ordered list of
//! `Step`s, each wrapping one `StorageOp`. The executor walks this list.
//!
//! # Staging Layout
//!
//! ```text
//! /mnt                      raw btrfs volume (top level, subvolid 5)
//! /mnt/@                    root subvolume, the target tree is assembled here
//! /mnt/@home                created flat at the top level ...
//! /mnt/@/home               ... and mounted into the target tree
//! /mnt/@snapshots/home      nested names live under plain directories
//! ```
//!
//! After every subvolume is mounted, the tree under `/mnt/@` is rebound over
//! `/mnt` so the target root appears where the bootstrap tooling expects it.
//! The raw volume stays mounted underneath the rebind.
//!
//! # Phases
//!
//! | Phase    | Operations |
//! |----------|------------|
//! | Prepare  | Erase table → Partition → Format → Mount raw volume |
//! | Layout   | per subvolume: Create → Mount points for children → Mount |
//! | Finalize | Rebind root subvolume → Mount EFI partition |
//!
//! Building is pure: no I/O, and the same inputs always give the same steps.

use crate::error::PlanError;
use crate::hardware::FirmwareMode;
use crate::topology::Topology;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use strum::Display;
use tracing::debug;

// ============================================================================
// Options
// ============================================================================

/// How the partition creation step is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    /// Fixed `sgdisk` layout
    #[default]
    Scripted,
    /// Operator partitions by hand in `cfdisk`
    Interactive,
}

/// Inputs to `build` besides the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Whole-disk device node
    pub disk: PathBuf,
    /// Where the raw volume and later the target root are mounted
    pub target: PathBuf,
    pub firmware: FirmwareMode,
    pub partitioning: PartitionMode,
    /// sgdisk size of the EFI system partition (e.g. "512M")
    pub esp_size: String,
    /// btrfs filesystem label
    pub fs_label: String,
    /// Mount options shared by every subvolume mount
    pub mount_options: String,
    /// EFI partition mount point inside the target root
    pub efi_mount: PathBuf,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            disk: PathBuf::from("/dev/vda"),
            target: PathBuf::from("/mnt"),
            firmware: FirmwareMode::Uefi,
            partitioning: PartitionMode::Scripted,
            esp_size: "512M".to_string(),
            fs_label: "archroot".to_string(),
            mount_options: "noatime,compress=zstd:1,space_cache=v2".to_string(),
            efi_mount: PathBuf::from("/boot/efi"),
        }
    }
}

// ============================================================================
// Storage Operation Types
// ============================================================================

/// A single operation handed to the environment.
///
/// `Display` renders the exact shell command that is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageOp {
    /// Destroy GPT and MBR structures (sgdisk --zap-all)
    WipePartitionTable { disk: PathBuf },

    /// Create partition 1 (ESP or BIOS boot) and partition 2 (root)
    CreatePartitions {
        disk: PathBuf,
        firmware: FirmwareMode,
        esp_size: String,
    },

    /// Hand the disk to cfdisk
    EditPartitions { disk: PathBuf },

    /// FAT32 for the EFI system partition
    FormatEsp { device: PathBuf },

    /// btrfs for the root partition
    FormatBtrfs { device: PathBuf, label: String },

    /// Mount the btrfs top level
    MountRawVolume { device: PathBuf, target: PathBuf },

    /// btrfs subvolume create, making the containing directory when nested
    CreateSubvolume {
        path: PathBuf,
        parent_dir: Option<PathBuf>,
    },

    /// Mount points for child subvolumes
    CreateDirectories { paths: Vec<PathBuf> },

    /// Mount one subvolume into the target tree
    MountSubvolume {
        device: PathBuf,
        subvolume: String,
        options: String,
        mountpoint: PathBuf,
    },

    /// Rebind the assembled root subvolume tree over the raw mount, which
    /// stays mounted underneath
    RebindRoot { source: PathBuf, target: PathBuf },

    /// Mount the EFI system partition into the target root
    MountEsp { device: PathBuf, mountpoint: PathBuf },
}

impl StorageOp {
    /// Returns true if this operation destroys or rewrites on-disk data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::WipePartitionTable { .. }
                | Self::CreatePartitions { .. }
                | Self::EditPartitions { .. }
                | Self::FormatEsp { .. }
                | Self::FormatBtrfs { .. }
        )
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WipePartitionTable { disk } => write!(f, "sgdisk --zap-all {}", quote(disk)),
            Self::CreatePartitions { disk, firmware, esp_size } => match firmware {
                FirmwareMode::Uefi => write!(
                    f,
                    "sgdisk -n 1:0:+{} -t 1:ef00 -c 1:EFI -n 2:0:0 -t 2:8300 -c 2:root {}",
                    esp_size,
                    quote(disk)
                ),
                FirmwareMode::Bios => write!(
                    f,
                    "sgdisk -n 1:0:+1M -t 1:ef02 -c 1:BIOS -n 2:0:0 -t 2:8300 -c 2:root {}",
                    quote(disk)
                ),
            },
            Self::EditPartitions { disk } => write!(f, "cfdisk {}", quote(disk)),
            Self::FormatEsp { device } => write!(f, "mkfs.fat -F 32 -n EFI {}", quote(device)),
            Self::FormatBtrfs { device, label } => {
                write!(f, "mkfs.btrfs -f -L {} {}", quote(label), quote(device))
            }
            Self::MountRawVolume { device, target } => {
                write!(f, "mount {} {}", quote(device), quote(target))
            }
            Self::CreateSubvolume { path, parent_dir } => {
                if let Some(dir) = parent_dir {
                    write!(f, "mkdir -p {} && ", quote(dir))?;
                }
                write!(f, "btrfs subvolume create {}", quote(path))
            }
            Self::CreateDirectories { paths } => {
                write!(f, "mkdir -p")?;
                for path in paths {
                    write!(f, " {}", quote(path))?;
                }
                Ok(())
            }
            Self::MountSubvolume { device, subvolume, options, mountpoint } => {
                let opts = if options.is_empty() {
                    format!("subvol={}", subvolume)
                } else {
                    format!("{},subvol={}", options, subvolume)
                };
                write!(f, "mount -o {} {} {}", quote(&opts), quote(device), quote(mountpoint))
            }
            Self::RebindRoot { source, target } => {
                write!(f, "mount --rbind {} {}", quote(source), quote(target))
            }
            Self::MountEsp { device, mountpoint } => write!(
                f,
                "mkdir -p {} && mount {} {}",
                quote(mountpoint),
                quote(device),
                quote(mountpoint)
            ),
        }
    }
}

// ============================================================================
// Steps and Plans
// ============================================================================

/// Which part of the plan a step belongs to. Phases never interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Layout,
    Finalize,
}

/// One confirmable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// 1-based position in the plan
    pub ordinal: usize,
    pub phase: Phase,
    pub description: String,
    /// Exact command line dispatched to the environment
    pub command: String,
    pub op: StorageOp,
}

/// An ordered, dependency-respecting list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub disk: PathBuf,
    pub firmware: FirmwareMode,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// Returns true if any step destroys on-disk data.
    pub fn is_destructive(&self) -> bool {
        self.steps.iter().any(|s| s.op.is_destructive())
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Provisioning plan for {}", self.disk.display()),
            format!("  Firmware: {}", self.firmware),
            format!("  Steps ({}):", self.steps.len()),
        ];
        for step in &self.steps {
            lines.push(format!("    {:>2}. [{}] {}", step.ordinal, step.phase, step.description));
            lines.push(format!("        $ {}", step.command));
        }
        lines.join("\n")
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Accumulates steps and assigns ordinals.
struct StepList {
    steps: Vec<Step>,
}

impl StepList {
    fn push(&mut self, phase: Phase, description: String, op: StorageOp) {
        let step = Step {
            ordinal: self.steps.len() + 1,
            phase,
            description,
            command: op.to_string(),
            op,
        };
        self.steps.push(step);
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// Build the provisioning plan for `topology`.
///
/// # Errors
///
/// - `InvalidDisk` if `options.disk` is not under `/dev/`
/// - `InvalidEspSize` if a scripted UEFI layout gets a malformed ESP size
/// - `MissingRoot` if no subvolume is mounted at `/`
/// - `Cycle` if the topology cannot be linearized
pub fn build(topology: &Topology, options: &PlanOptions) -> Result<Plan, PlanError> {
    let disk = &options.disk;
    if !disk.starts_with("/dev/") || disk == Path::new("/dev") {
        return Err(PlanError::InvalidDisk(disk.display().to_string()));
    }

    let uefi = options.firmware.is_uefi();
    if uefi
        && options.partitioning == PartitionMode::Scripted
        && !is_sgdisk_size(&options.esp_size)
    {
        return Err(PlanError::InvalidEspSize(options.esp_size.clone()));
    }

    let root = topology.root().ok_or(PlanError::MissingRoot)?;
    let order = topology.topological_order()?;

    let first_part = partition_path(disk, 1);
    let root_part = partition_path(disk, 2);
    let target = &options.target;
    let tree_root = target.join(&root.name);

    let mut list = StepList { steps: Vec::new() };

    // Prepare
    list.push(
        Phase::Prepare,
        format!("Erase the partition table on {}", disk.display()),
        StorageOp::WipePartitionTable { disk: disk.clone() },
    );
    match options.partitioning {
        PartitionMode::Scripted => {
            let description = if uefi {
                format!(
                    "Create a {} EFI system partition and a root partition on {}",
                    options.esp_size,
                    disk.display()
                )
            } else {
                format!("Create a BIOS boot partition and a root partition on {}", disk.display())
            };
            list.push(
                Phase::Prepare,
                description,
                StorageOp::CreatePartitions {
                    disk: disk.clone(),
                    firmware: options.firmware,
                    esp_size: options.esp_size.clone(),
                },
            );
        }
        PartitionMode::Interactive => list.push(
            Phase::Prepare,
            format!(
                "Partition {} by hand: partition 1 for {}, partition 2 for the root filesystem",
                disk.display(),
                if uefi { "EFI" } else { "BIOS boot" }
            ),
            StorageOp::EditPartitions { disk: disk.clone() },
        ),
    }
    if uefi {
        list.push(
            Phase::Prepare,
            format!("Format {} as FAT32 (EFI system partition)", first_part.display()),
            StorageOp::FormatEsp { device: first_part.clone() },
        );
    }
    list.push(
        Phase::Prepare,
        format!("Format {} as btrfs labelled {}", root_part.display(), options.fs_label),
        StorageOp::FormatBtrfs {
            device: root_part.clone(),
            label: options.fs_label.clone(),
        },
    );
    list.push(
        Phase::Prepare,
        format!("Mount the raw btrfs volume at {}", target.display()),
        StorageOp::MountRawVolume {
            device: root_part.clone(),
            target: target.clone(),
        },
    );

    // Layout
    for sv in order {
        let created_at = target.join(&sv.name);
        let parent_dir = if sv.name.contains('/') {
            created_at.parent().map(Path::to_path_buf)
        } else {
            None
        };
        list.push(
            Phase::Layout,
            format!("Create subvolume {}", sv.name),
            StorageOp::CreateSubvolume {
                path: created_at.clone(),
                parent_dir,
            },
        );

        let children = topology.children(&sv.name);
        if !children.is_empty() {
            let paths: Vec<PathBuf> = children
                .iter()
                .map(|child| {
                    let rel = child
                        .mount_path
                        .strip_prefix(&sv.mount_path)
                        .unwrap_or(child.relative_mount());
                    created_at.join(rel)
                })
                .collect();
            let mounts: Vec<String> = children
                .iter()
                .map(|child| child.mount_path.display().to_string())
                .collect();
            list.push(
                Phase::Layout,
                format!("Create mount points inside {} for {}", sv.name, mounts.join(", ")),
                StorageOp::CreateDirectories { paths },
            );
        }

        if !sv.is_root() {
            list.push(
                Phase::Layout,
                format!("Mount subvolume {} at {}", sv.name, sv.mount_path.display()),
                StorageOp::MountSubvolume {
                    device: root_part.clone(),
                    subvolume: sv.name.clone(),
                    options: options.mount_options.clone(),
                    mountpoint: tree_root.join(sv.relative_mount()),
                },
            );
        }
    }

    // Finalize
    list.push(
        Phase::Finalize,
        format!(
            "Rebind the target tree from root subvolume {} over {} (the raw volume stays \
             mounted underneath)",
            root.name,
            target.display()
        ),
        StorageOp::RebindRoot {
            source: tree_root.clone(),
            target: target.clone(),
        },
    );
    if uefi {
        let efi_rel = options
            .efi_mount
            .strip_prefix("/")
            .unwrap_or(options.efi_mount.as_path());
        list.push(
            Phase::Finalize,
            format!("Mount the EFI system partition at {}", options.efi_mount.display()),
            StorageOp::MountEsp {
                device: first_part,
                mountpoint: target.join(efi_rel),
            },
        );
    }

    debug!("Built plan with {} steps for {}", list.steps.len(), disk.display());

    Ok(Plan {
        disk: disk.clone(),
        firmware: options.firmware,
        steps: list.steps,
    })
}

/// Get the partition device path for a given disk and partition number.
///
/// Handles NVMe/loop/mmcblk naming (`/dev/nvme0n1p2`) vs SATA/virtio
/// naming (`/dev/vda2`).
pub fn partition_path(disk: &Path, partition_num: u32) -> PathBuf {
    let disk_str = disk.display().to_string();

    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, partition_num))
    } else {
        PathBuf::from(format!("{}{}", disk_str, partition_num))
    }
}

/// A positive sgdisk size: digits with an optional binary unit suffix.
fn is_sgdisk_size(size: &str) -> bool {
    let digits = size.trim_end_matches(['K', 'M', 'G', 'T']);
    size.len() - digits.len() <= 1
        && digits.parse::<u64>().is_ok_and(|n| n > 0)
}

/// Single-quote a word for `sh -c` when it contains anything unusual.
fn quote(word: impl AsRef<Path>) -> String {
    let s = word.as_ref().display().to_string();
    let plain = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '@' | ':' | ',' | '=' | '+')
        });
    if plain {
        s
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

// ============================================================================
// Tests
// ============================================================================
