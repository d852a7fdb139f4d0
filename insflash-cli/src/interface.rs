//! Ethernet interface selection.

use {
    crate::{
        CliError,
        config::Config,
        serial::{ensure_interactive_terminal, map_prompt_error},
    },
    anyhow::Result,
    dialoguer::{Select, theme::ColorfulTheme},
    insflash::transport::datalink::InterfaceInfo,
    log::{debug, info},
    std::cmp::Ordering,
};

/// Label shown for an interface in lists and prompts.
pub fn interface_label(iface: &InterfaceInfo) -> String {
    let mac = iface
        .mac
        .as_ref()
        .map(|mac| format!(" [{mac}]"))
        .unwrap_or_default();
    if iface.description.is_empty() {
        format!("{}{mac}", iface.name)
    } else {
        format!("{}{mac} - {}", iface.name, iface.description)
    }
}

fn pick(mut interfaces: Vec<InterfaceInfo>, non_interactive: bool) -> Result<String> {
    match interfaces.len().cmp(&1) {
        Ordering::Less => Err(CliError::Usage("No usable network interfaces found".into()).into()),
        Ordering::Equal => {
            let iface = interfaces.remove(0);
            info!("Auto-selected interface: {}", interface_label(&iface));
            Ok(iface.name)
        },
        Ordering::Greater if non_interactive => Err(CliError::Usage(
            "Multiple network interfaces found; pass --iface in non-interactive mode".into(),
        )
        .into()),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            let labels: Vec<String> = interfaces.iter().map(interface_label).collect();
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select the interface the unit is cabled to")
                .items(&labels)
                .default(0)
                .interact_opt()
                .map_err(map_prompt_error)?;
            match selection {
                Some(index) => Ok(interfaces.swap_remove(index).name),
                None => Err(CliError::Cancelled("Selection cancelled".into()).into()),
            }
        },
    }
}

/// Pick the interface to open: flag, then config, then the host's list.
pub fn select_interface(
    explicit: Option<&str>,
    config: &Config,
    non_interactive: bool,
) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    if let Some(name) = &config.connection.iface {
        debug!("Using interface from config: {name}");
        return Ok(name.clone());
    }
    pick(insflash::list_interfaces(), non_interactive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insflash::protocol::MacAddr;

    fn iface(name: &str) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            mac: Some(MacAddr([0x02, 0, 0, 0, 0, 0x01])),
            description: String::new(),
            is_up: true,
            is_loopback: false,
        }
    }

    #[test]
    fn test_explicit_interface_wins() {
        let mut config = Config::default();
        config.connection.iface = Some("eth1".into());
        assert_eq!(select_interface(Some("enp3s0"), &config, true).unwrap(), "enp3s0");
        assert_eq!(select_interface(None, &config, true).unwrap(), "eth1");
    }

    #[test]
    fn test_single_interface_auto_selected() {
        assert_eq!(pick(vec![iface("eth0")], true).unwrap(), "eth0");
    }

    #[test]
    fn test_ambiguous_interfaces_need_flag() {
        let err = pick(vec![iface("eth0"), iface("eth1")], true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        let err = pick(Vec::new(), true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_interface_label() {
        assert_eq!(interface_label(&iface("eth0")), "eth0 [02:00:00:00:00:01]");
        let mut described = iface("eth0");
        described.description = "Intel".into();
        assert_eq!(interface_label(&described), "eth0 [02:00:00:00:00:01] - Intel");
    }
}
