//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.
//! Link resolution is shared here.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod image;
pub(crate) mod ports;
pub(crate) mod upgrade;

use {
    crate::{
        Cli, CliError, Interface,
        config::Config,
        interface::select_interface,
        serial::{SerialOptions, select_serial_port},
    },
    anyhow::{Context, Result},
    console::style,
    insflash::{
        Communicator, DeviceKind, Driver, EthernetCommunicator, EthernetConfig,
        SerialCommunicator, SerialConfig, TransportKind,
    },
};

/// Application baud the units ship with.
pub(crate) const DEFAULT_BAUD: u32 = 460800;

/// Model named on the command line or in the config, if any.
pub(crate) fn selected_model(cli: &Cli, config: &Config) -> Result<Option<DeviceKind>> {
    if let Some(model) = cli.device {
        return Ok(Some(model.into()));
    }
    config
        .connection
        .device
        .as_deref()
        .map(|name| {
            name.parse::<DeviceKind>()
                .map_err(|e| CliError::Usage(format!("Invalid device in config: {e}")).into())
        })
        .transpose()
}

/// Which link to open: flag, config, the model's transport, then `--iface`.
pub(crate) fn resolve_transport(
    cli: &Cli,
    config: &Config,
    model: Option<DeviceKind>,
) -> Result<TransportKind> {
    if let Some(interface) = cli.interface {
        return Ok(match interface {
            Interface::Uart => TransportKind::Serial,
            Interface::Eth => TransportKind::Ethernet,
        });
    }
    if let Some(name) = config.connection.interface.as_deref() {
        return match name.to_ascii_lowercase().as_str() {
            "uart" | "serial" => Ok(TransportKind::Serial),
            "eth" | "ethernet" => Ok(TransportKind::Ethernet),
            other => Err(CliError::Usage(format!("Invalid interface in config: {other}")).into()),
        };
    }
    if let Some(kind) = model {
        return Ok(kind.transport());
    }
    if cli.iface.is_some() || config.connection.iface.is_some() {
        return Ok(TransportKind::Ethernet);
    }
    Ok(TransportKind::Serial)
}

/// Open the link the invocation names and wrap it in a driver.
pub(crate) fn open_driver(
    cli: &Cli,
    config: &Config,
) -> Result<(Driver<Box<dyn Communicator>>, Vec<DeviceKind>)> {
    let model = selected_model(cli, config)?;
    let transport = resolve_transport(cli, config, model)?;
    if let Some(kind) = model {
        if kind.transport() != transport {
            return Err(CliError::Usage(format!("{kind} is not reachable over {transport}")).into());
        }
    }

    let mut policy = config.upgrade_policy();
    let link: Box<dyn Communicator> = match transport {
        TransportKind::Serial => {
            let options = SerialOptions {
                port: cli.port.clone(),
                non_interactive: cli.non_interactive,
            };
            let port = select_serial_port(&options, config)?;
            let baud = cli.baud.or(config.connection.baud);
            if let Some(baud) = baud {
                policy.discovery.baud_rates = vec![baud];
            }
            let baud = baud.unwrap_or(DEFAULT_BAUD);
            if !cli.quiet {
                eprintln!(
                    "{} Opening {} at {baud}",
                    style("🔌").cyan(),
                    style(&port).green()
                );
            }
            Box::new(
                SerialCommunicator::open(&SerialConfig::new(port.as_str(), baud))
                    .with_context(|| format!("Failed to open {port}"))?,
            )
        },
        TransportKind::Ethernet => {
            let iface = select_interface(cli.iface.as_deref(), config, cli.non_interactive)?;
            if !cli.quiet {
                eprintln!("{} Opening {}", style("🔌").cyan(), style(&iface).green());
            }
            Box::new(
                EthernetCommunicator::open(&iface, EthernetConfig::default())
                    .with_context(|| format!("Failed to open {iface}"))?,
            )
        },
    };

    Ok((Driver::with_policy(link, policy), model.into_iter().collect()))
}

/// Open the link and find the unit behind it.
pub(crate) fn connect(cli: &Cli, config: &Config) -> Result<Driver<Box<dyn Communicator>>> {
    let (mut driver, kinds) = open_driver(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Looking for the unit...", style("⏳").yellow());
    }
    let handle = driver.discover(&kinds).context("Discovery failed")?;
    if !cli.quiet {
        eprintln!(
            "{} Found {} (SN {})",
            style("✓").green(),
            style(handle.kind).yellow(),
            handle.identity.serial_number
        );
    }
    Ok(driver)
}
