//! subvolseq - Main entry point
//!
//! Builds the provisioning plan, runs pre-flight checks, and hands the plan
//! to the confirmation executor.

use anyhow::{Context, Result};
use crossterm::tty::IsTty;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use subvolseq::cli::{
    write_completions, write_man_page, Cli, Commands, FirmwareArg, PartitioningArg, PlanArgs,
};
use subvolseq::layout_file::{self, LayoutFile};
use subvolseq::{
    build, detect_firmware_mode, preflight, DryRunEnvironment, Environment, Executor,
    FirmwareMode, PartitionMode, Plan, PlanOptions, RunReport, SequencerError,
    ShellEnvironment, Topology,
};

/// Every step was confirmed and dispatched
const EXIT_COMPLETED: u8 = 0;
/// Startup, layout, pre-flight, or console failure
const EXIT_ERROR: u8 = 1;
/// The operator refused a step
const EXIT_HALTED: u8 = 3;

/// Initialize the logger with appropriate settings
fn init_logger(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    // RUST_LOG overrides the default level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Main application entry point
fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    match dispatch_command(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn dispatch_command(cli: Cli) -> Result<u8> {
    let command = cli.command.unwrap_or(Commands::Run {
        plan: PlanArgs::default(),
        dry_run: false,
        skip_preflight: false,
    });

    match command {
        Commands::Run {
            plan,
            dry_run,
            skip_preflight,
        } => run_plan(&plan, dry_run, skip_preflight),
        Commands::Plan { plan, json } => {
            let plan = prepare_plan(&plan)?;
            if json {
                let rendered = serde_json::to_string_pretty(&plan).map_err(SequencerError::from)?;
                println!("{}", rendered);
            } else {
                println!("{}", plan.summary());
            }
            Ok(EXIT_COMPLETED)
        }
        Commands::Layout { output } => {
            let layout = LayoutFile::from_topology(&Topology::reference());
            match output {
                Some(path) => {
                    layout.save_to_file(&path)?;
                    info!("Layout written to {}", path.display());
                }
                None => {
                    let rendered =
                        serde_json::to_string_pretty(&layout).map_err(SequencerError::from)?;
                    println!("{}", rendered);
                }
            }
            Ok(EXIT_COMPLETED)
        }
        Commands::Completions { shell } => {
            write_completions(shell, &mut io::stdout());
            Ok(EXIT_COMPLETED)
        }
        Commands::Man => {
            write_man_page(&mut io::stdout()).context("Failed to write man page")?;
            Ok(EXIT_COMPLETED)
        }
    }
}

/// Resolve CLI arguments into a validated plan. Nothing runs here.
fn prepare_plan(args: &PlanArgs) -> Result<Plan> {
    let topology = match &args.layout {
        Some(path) => {
            info!("Loading layout from {}", path.display());
            layout_file::load_topology(path)?
        }
        None => Topology::reference(),
    };

    let firmware = match args.firmware {
        FirmwareArg::Auto => detect_firmware_mode(),
        FirmwareArg::Uefi => FirmwareMode::Uefi,
        FirmwareArg::Bios => FirmwareMode::Bios,
    };
    let partitioning = match args.partitioning {
        PartitioningArg::Scripted => PartitionMode::Scripted,
        PartitioningArg::Interactive => PartitionMode::Interactive,
    };

    let options = PlanOptions {
        disk: args.disk.clone(),
        target: args.target.clone(),
        firmware,
        partitioning,
        esp_size: args.esp_size.clone(),
        fs_label: args.label.clone(),
        mount_options: args.mount_options.clone(),
        efi_mount: args.efi_mount.clone(),
    };

    let plan = build(&topology, &options)
        .map_err(SequencerError::from)
        .context("Failed to build provisioning plan")?;
    debug!("{}", plan.summary());
    Ok(plan)
}

fn run_plan(args: &PlanArgs, dry_run: bool, skip_preflight: bool) -> Result<u8> {
    let plan = prepare_plan(args)?;

    if dry_run || skip_preflight {
        debug!("Pre-flight checks skipped");
    } else {
        let report = preflight::verify_environment(&plan);
        if !report.is_ok() {
            return Err(SequencerError::preflight(report.problems().join("; ")).into());
        }
        info!("Pre-flight checks passed");
    }

    println!(
        "{} steps on {} ({} firmware). Answer y or yes to run a command; anything else stops.",
        plan.len(),
        plan.disk.display(),
        plan.firmware
    );
    if plan.is_destructive() && !dry_run {
        println!("WARNING: this plan erases every partition on {}.", plan.disk.display());
    }

    let report = if dry_run {
        execute(plan, DryRunEnvironment::new(io::stdout()))?
    } else {
        execute(plan, ShellEnvironment::new())?
    };

    if report.state.is_halted() {
        warn!(
            "Halted by operator at step {:?} after {} of {} steps",
            report.halted_at, report.dispatched, report.total
        );
        return Ok(EXIT_HALTED);
    }

    if !report.failed.is_empty() {
        warn!("Steps reported failure: {:?}", report.failed);
    }
    println!("All {} steps dispatched.", report.total);
    Ok(EXIT_COMPLETED)
}

fn execute<E: Environment>(plan: Plan, env: E) -> Result<RunReport> {
    let stdout = io::stdout();
    let styled = stdout.is_tty();
    let mut executor = Executor::new(io::stdin().lock(), stdout, env).styled(styled);

    let report = executor
        .run(plan)
        .map_err(SequencerError::from)
        .context("Console I/O failed")?;
    io::stdout().flush().ok();
    Ok(report)
}
