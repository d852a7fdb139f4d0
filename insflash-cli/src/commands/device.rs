//! Commands that talk to a unit: ping and raw send.

use {
    super::connect,
    crate::{Cli, CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    insflash::PacketType,
    std::{fmt::Write as _, time::Duration},
};

/// Discover the unit and print its identity.
pub(crate) fn cmd_ping(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let driver = connect(cli, config)?;
    let handle = driver.handle().context("No unit bound")?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": serde_json::to_value(handle)?,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let identity = &handle.identity;
    println!("{}", style(format!("{} over {}", handle.kind, handle.transport)).bold());
    println!("  Name:        {}", identity.name);
    println!("  Part number: {}", identity.part_number);
    println!("  Serial:      {}", identity.serial_number);
    let rows = [
        ("Hardware:   ", &identity.hardware),
        ("Application:", &identity.app_name),
        ("Firmware:   ", &identity.firmware_version),
        ("Bootloader: ", &identity.bootloader_version),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            println!("  {label} {value}");
        }
    }
    if let Some(mode) = &identity.mode {
        println!("  Mode:        {mode:?}");
    }
    Ok(())
}

/// Send a raw command and print the reply payload as hex.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    packet_type: &str,
    payload: Option<&str>,
    timeout_ms: u64,
) -> Result<()> {
    let packet_type = PacketType::parse(packet_type)
        .ok_or_else(|| CliError::Usage(format!("Invalid packet type: {packet_type}")))?;
    let payload = payload
        .map(parse_hex)
        .transpose()?
        .unwrap_or_default();

    let mut driver = connect(cli, config)?;
    let reply = driver
        .send_command(packet_type, &payload, Duration::from_millis(timeout_ms))
        .with_context(|| format!("No reply to {packet_type}"))?;
    println!("{}", to_hex(&reply));
    Ok(())
}

/// Decode a hex string; spaces and a leading `0x` are allowed.
fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !digits.is_ascii() {
        return Err(CliError::Usage(format!("Invalid hex payload: {text}")).into());
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::Usage(format!("Odd number of hex digits in payload: {text}")).into());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| anyhow::Error::from(CliError::Usage(format!("Invalid hex payload: {text}"))))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01cc").unwrap(), vec![0x01, 0xCC]);
        assert_eq!(parse_hex("0x0a 0b").unwrap(), vec![0x0A, 0x0B]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_rejects_bad_input() {
        for bad in ["abc", "zz", "0x1", "é0"] {
            let err = parse_hex(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CliError>(),
                Some(CliError::Usage(_))
            ));
        }
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x10]), "00ab10");
        assert_eq!(to_hex(&[]), "");
    }
}
