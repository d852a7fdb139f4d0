//! insflash CLI - discover and upgrade RTK/INS navigation units.
//!
//! ## Features
//!
//! - Discover units over UART or raw Ethernet
//! - Upgrade firmware from combined images with per-worker progress
//! - Inspect and build combined images
//! - Send raw commands
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use insflash::DeviceKind;
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod interface;
mod serial;

use config::Config;

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether the user asked to stop.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Failures that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// insflash - host tool for RTK/INS navigation units.
///
/// Environment variables:
///   INSFLASH_INTERFACE          - Link kind (uart, eth)
///   INSFLASH_PORT               - Serial port
///   INSFLASH_BAUD               - Serial baud rate
///   INSFLASH_IFACE              - Ethernet interface name
///   INSFLASH_DEVICE             - Device model
///   INSFLASH_NON_INTERACTIVE    - Non-interactive mode (disable prompts)
///   INSFLASH_CONFIG             - Configuration file
#[derive(Parser)]
#[command(name = "insflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Link kind (derived from --device or --iface when omitted).
    #[arg(long, global = true, value_enum, env = "INSFLASH_INTERFACE")]
    interface: Option<Interface>,

    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "INSFLASH_PORT")]
    port: Option<String>,

    /// Serial baud rate (probed if not specified).
    #[arg(short, long, global = true, env = "INSFLASH_BAUD")]
    baud: Option<u32>,

    /// Ethernet interface to use.
    #[arg(long, global = true, env = "INSFLASH_IFACE")]
    iface: Option<String>,

    /// Device model.
    #[arg(short, long, global = true, value_enum, env = "INSFLASH_DEVICE")]
    device: Option<Model>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "INSFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "INSFLASH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Link kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Interface {
    /// Serial line.
    Uart,
    /// Raw Ethernet.
    Eth,
}

/// Supported models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Model {
    /// RTK330L (UART).
    Rtk330l,
    /// INS401 (Ethernet).
    Ins401,
    /// INS502 (Ethernet).
    Ins502,
    /// Beidou INS (UART).
    Beidou,
}

impl From<Model> for DeviceKind {
    fn from(model: Model) -> Self {
        match model {
            Model::Rtk330l => Self::Rtk330l,
            Model::Ins401 => Self::Ins401,
            Model::Ins502 => Self::Ins502,
            Model::Beidou => Self::Beidou,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List network interfaces usable for raw Ethernet.
    ListInterfaces {
        /// Output interface list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Discover the unit and print its identity.
    Ping {
        /// Output the identity as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Upgrade firmware from a combined image.
    Upgrade {
        /// Path to the combined image.
        image: PathBuf,

        /// Only write these sections (comma-separated: rtk,ins,imu_boot,imu).
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Show the sections of a combined image.
    Info {
        /// Path to the combined image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Build a combined image from section files.
    Combine {
        /// Section to add, in order (format: name=path, can be repeated).
        #[arg(long = "section", value_parser = commands::image::parse_section, required = true)]
        sections: Vec<(String, PathBuf)>,

        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Send a raw command and print the reply payload.
    Send {
        /// Packet type: four hex digits (01cc) or two ASCII letters (pG).
        packet_type: String,

        /// Payload as hex.
        payload: Option<String>,

        /// Reply timeout in milliseconds.
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Exit code for a failed run.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if matches!(
        err.downcast_ref::<insflash::Error>(),
        Some(insflash::Error::Stopped)
    ) {
        return 130;
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("Stopping after the current step... (press Ctrl-C again to abort)");
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    insflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::ListInterfaces { json } => commands::ports::cmd_list_interfaces(*json),
        Commands::Ping { json } => commands::device::cmd_ping(cli, &config, *json),
        Commands::Upgrade { image, targets } => {
            commands::upgrade::cmd_upgrade(cli, &config, image, targets)
        },
        Commands::Info { image, json } => commands::image::cmd_info(cli, &config, image, *json),
        Commands::Combine { sections, output } => commands::image::cmd_combine(cli, sections, output),
        Commands::Send {
            packet_type,
            payload,
            timeout_ms,
        } => commands::device::cmd_send(cli, &config, packet_type, payload.as_deref(), *timeout_ms),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(&cli);
    install_interrupt_handler();
    debug!(
        "insflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
