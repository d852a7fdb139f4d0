//! Interactive serial port selection.
//!
//! Ports behind the FTDI and CP210x bridges fitted to the supported boards
//! are offered first. Non-interactive mode fails instead of prompting when
//! the choice is ambiguous.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    insflash::{BridgeKind, DetectedPort, detect_ports},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn select_non_interactive_port(mut selection_ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => selection_ports
            .pop()
            .ok_or_else(|| usage_err("No serial ports available")),
        Ordering::Greater => Err(usage_err(
            "Multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Pick the serial port to open.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    let selection_ports = candidates(ports);

    if options.non_interactive {
        return select_non_interactive_port(selection_ports).map(|port| port.name);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports)
        },
        Ordering::Equal => {
            let port = select_non_interactive_port(selection_ports)?;
            info!("Auto-selected port: {} [{}]", port.name, port.bridge.name());
            Ok(port.name)
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Ports behind the fitted bridges, else known bridges, else everything.
fn candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    let preferred: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.bridge.is_preferred())
        .cloned()
        .collect();
    if !preferred.is_empty() {
        return preferred;
    }
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.bridge.is_known())
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

pub(crate) fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive selection requires a terminal; use --non-interactive with an explicit choice",
        ))
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err("Prompt failed")
            }
        },
    }
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.bridge.is_preferred() {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let bridge = if port.bridge == BridgeKind::Unknown {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        }
    } else {
        format!(" [{}]", style(port.bridge.name()).yellow())
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{bridge}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !p.bridge.is_preferred());

    // Keep each label on one line in narrow terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| console::truncate_str(&port_label(port), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|port| port.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        let bridge = match (vid, pid) {
            (Some(vid), Some(pid)) => BridgeKind::from_vid_pid(vid, pid),
            _ => BridgeKind::Unknown,
        };
        DetectedPort {
            name: name.to_string(),
            bridge,
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    fn assert_usage(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("/dev/ttyUSB3".to_string()),
            non_interactive: true,
        };
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB0".to_string());
        assert_eq!(select_serial_port(&options, &config).unwrap(), "/dev/ttyUSB3");
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.connection.serial = Some("COM7".to_string());
        let options = SerialOptions {
            non_interactive: true,
            ..Default::default()
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "COM7");
    }

    #[test]
    fn test_candidates_prefer_fitted_bridges() {
        let ports = vec![
            port("/dev/ttyS0", None, None),
            port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)),
            port("/dev/ttyUSB1", Some(0x0403), Some(0x6011)),
        ];
        let picked = candidates(ports);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "/dev/ttyUSB1");
    }

    #[test]
    fn test_candidates_fall_back_to_all_ports() {
        let ports = vec![port("/dev/ttyS0", None, None), port("/dev/ttyS1", None, None)];
        assert_eq!(candidates(ports).len(), 2);
    }

    #[test]
    fn test_non_interactive_multiple_ports_is_usage_error() {
        let ports = vec![port("/dev/ttyS0", None, None), port("/dev/ttyS1", None, None)];
        assert_usage(&select_non_interactive_port(ports).unwrap_err());
    }

    #[test]
    fn test_non_interactive_no_ports_is_usage_error() {
        assert_usage(&select_non_interactive_port(Vec::new()).unwrap_err());
    }

    #[test]
    fn test_non_interactive_single_port_selected() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyUSB0", None, None)]).unwrap();
        assert_eq!(selected.name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_port_label_shows_bridge_or_ids() {
        let label = console::strip_ansi_codes(&port_label(&port(
            "/dev/ttyUSB0",
            Some(0x10C4),
            Some(0xEA60),
        )))
        .into_owned();
        assert_eq!(label, "/dev/ttyUSB0 [CP210x]");

        let label = console::strip_ansi_codes(&port_label(&port(
            "/dev/ttyACM0",
            Some(0x1234),
            Some(0x0001),
        )))
        .into_owned();
        assert_eq!(label, "/dev/ttyACM0 (1234:0001)");
    }
}
