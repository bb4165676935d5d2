use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::io::{self, Write};
use std::path::PathBuf;

pub const DEFAULT_DISK: &str = "/dev/vda";
pub const DEFAULT_TARGET: &str = "/mnt";
pub const DEFAULT_ESP_SIZE: &str = "512M";
pub const DEFAULT_LABEL: &str = "archroot";
pub const DEFAULT_MOUNT_OPTIONS: &str = "noatime,compress=zstd:1,space_cache=v2";
pub const DEFAULT_EFI_MOUNT: &str = "/boot/efi";

/// subvolseq - step-by-step btrfs root storage setup for virtual machines
#[derive(Parser)]
#[command(name = "subvolseq")]
#[command(
    about = "Partition a disk and lay out btrfs subvolumes, confirming every command before it runs"
)]
#[command(version)]
pub struct Cli {
    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk the plan, asking for confirmation before every command (default)
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Print each confirmed command instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Skip the root, binary and disk checks
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Print the plan without running anything
    Plan {
        #[command(flatten)]
        plan: PlanArgs,

        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the built-in subvolume layout as JSON (a starting point for --layout)
    Layout {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the man page (roff)
    Man,
}

/// Options shared by `run` and `plan`
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct PlanArgs {
    /// Disk to partition (e.g., /dev/vda)
    #[arg(short, long, default_value = DEFAULT_DISK)]
    pub disk: PathBuf,

    /// Mount point for the new root
    #[arg(short, long, default_value = DEFAULT_TARGET)]
    pub target: PathBuf,

    /// Firmware mode; `auto` inspects /sys/firmware/efi
    #[arg(short, long, value_enum, default_value_t = FirmwareArg::Uefi)]
    pub firmware: FirmwareArg,

    /// Create partitions with sgdisk or by hand in cfdisk
    #[arg(short, long, value_enum, default_value_t = PartitioningArg::Scripted)]
    pub partitioning: PartitioningArg,

    /// JSON subvolume layout (built-in layout if omitted)
    #[arg(short, long)]
    pub layout: Option<PathBuf>,

    /// Size of the EFI system partition
    #[arg(long, default_value = DEFAULT_ESP_SIZE)]
    pub esp_size: String,

    /// btrfs filesystem label
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Mount options for every subvolume (subvol= is appended)
    #[arg(long, default_value = DEFAULT_MOUNT_OPTIONS)]
    pub mount_options: String,

    /// EFI partition mount point inside the new root
    #[arg(long, default_value = DEFAULT_EFI_MOUNT)]
    pub efi_mount: PathBuf,
}

impl Default for PlanArgs {
    fn default() -> Self {
        Self {
            disk: PathBuf::from(DEFAULT_DISK),
            target: PathBuf::from(DEFAULT_TARGET),
            firmware: FirmwareArg::Uefi,
            partitioning: PartitioningArg::Scripted,
            layout: None,
            esp_size: DEFAULT_ESP_SIZE.to_string(),
            label: DEFAULT_LABEL.to_string(),
            mount_options: DEFAULT_MOUNT_OPTIONS.to_string(),
            efi_mount: PathBuf::from(DEFAULT_EFI_MOUNT),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareArg {
    Auto,
    Uefi,
    Bios,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitioningArg {
    Scripted,
    Interactive,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Write the completion script for `shell`.
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    clap_complete::generate(shell, &mut Cli::command(), "subvolseq", out);
}

/// Render the man page as roff.
pub fn write_man_page(out: &mut dyn Write) -> io::Result<()> {
    clap_mangen::Man::new(Cli::command()).render(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plan_args_defaults_match_clap() {
        let cli = Cli::try_parse_from(["subvolseq", "run"]).expect("parse");
        match cli.command {
            Some(Commands::Run { plan, dry_run, skip_preflight }) => {
                assert_eq!(plan, PlanArgs::default());
                assert!(!dry_run);
                assert!(!skip_preflight);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_plan_flags() {
        let cli = Cli::try_parse_from([
            "subvolseq",
            "plan",
            "--disk",
            "/dev/nvme0n1",
            "--firmware",
            "auto",
            "--partitioning",
            "interactive",
            "--json",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Plan { plan, json }) => {
                assert!(json);
                assert_eq!(plan.disk, PathBuf::from("/dev/nvme0n1"));
                assert_eq!(plan.firmware, FirmwareArg::Auto);
                assert_eq!(plan.partitioning, PartitioningArg::Interactive);
            }
            _ => panic!("expected plan"),
        }
    }

    #[test]
    fn test_completions_and_man_page() {
        let cli = Cli::try_parse_from(["subvolseq", "completions", "zsh"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Completions { shell: Shell::Zsh })));

        let mut script = Vec::new();
        write_completions(Shell::Bash, &mut script);
        let script = String::from_utf8(script).expect("utf8");
        assert!(script.contains("subvolseq"));
        assert!(script.contains("--dry-run"));

        let mut page = Vec::new();
        write_man_page(&mut page).expect("render");
        let page = String::from_utf8(page).expect("utf8");
        assert!(page.contains(".TH"));
        assert!(page.contains("subvolseq"));
    }

    #[test]
    fn test_unknown_firmware_rejected() {
        assert!(Cli::try_parse_from(["subvolseq", "run", "--firmware", "coreboot"]).is_err());
    }
}
