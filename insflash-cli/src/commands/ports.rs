//! Port and interface listing.

use {
    crate::interface::interface_label,
    anyhow::Result,
    console::style,
    insflash::{auto_detect_port, detect_ports, host::format_port_list},
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": detected,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in format_port_list(&detected) {
        eprintln!("  {} {line}", style("•").dim());
    }

    if let Ok(port) = auto_detect_port() {
        eprintln!();
        eprintln!(
            "{} Auto-selected: {}",
            style("→").cyan(),
            style(&port.name).green()
        );
    }

    Ok(())
}

/// List interfaces usable for raw Ethernet.
pub(crate) fn cmd_list_interfaces(json: bool) -> Result<()> {
    let interfaces = insflash::list_interfaces();

    if json {
        let entries: Vec<serde_json::Value> = interfaces
            .iter()
            .map(|iface| {
                serde_json::json!({
                    "name": iface.name,
                    "mac": iface.mac.map(|mac| mac.to_string()),
                    "description": iface.description,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "interfaces": entries,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Network interfaces:").bold().underlined());
    if interfaces.is_empty() {
        eprintln!("  {}", style("No usable interfaces found").dim());
    }
    for iface in &interfaces {
        eprintln!("  {} {}", style("•").dim(), interface_label(iface));
    }
    Ok(())
}
