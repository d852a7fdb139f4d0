//! Combined image inspection and building.

use {
    super::selected_model,
    crate::{Cli, config::Config},
    anyhow::{Context, Result},
    console::style,
    insflash::{
        DEFAULT_RULES, FirmwareImage, combine, image::combined::SECTION_ALIGN, protocol::crc::crc16,
    },
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Parse a `name=path` section argument.
pub(crate) fn parse_section(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(format!("invalid section name '{name}'"));
    }
    if path.is_empty() {
        return Err(format!("missing path for section '{name}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

/// Show the sections of a combined image.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, image: &Path, json: bool) -> Result<()> {
    let rules = match selected_model(cli, config)? {
        Some(kind) => kind.profile().rules,
        None => DEFAULT_RULES,
    };
    let data =
        fs::read(image).with_context(|| format!("Failed to read image: {}", image.display()))?;
    let parsed = FirmwareImage::parse(&data, rules)?;

    if json {
        let sections: Vec<serde_json::Value> = parsed
            .sections()
            .iter()
            .map(|section| {
                serde_json::json!({
                    "name": section.name,
                    "offset": section.offset,
                    "length": section.len(),
                    "crc": format!("{:04x}", crc16(&section.content)),
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "image": image.display().to_string(),
                "size": data.len(),
                "sections": sections,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{} {} ({} bytes)",
        style("Image:").bold(),
        image.display(),
        data.len()
    );
    if parsed.is_empty() {
        println!("  {}", style("No sections").dim());
    }
    for section in parsed.sections() {
        println!(
            "  {:<10} offset 0x{:08X}  {:>9} bytes  crc {:04x}",
            style(&section.name).yellow(),
            section.offset,
            section.len(),
            crc16(&section.content)
        );
    }
    Ok(())
}

/// Build a combined image from section files, in argument order.
pub(crate) fn cmd_combine(cli: &Cli, sections: &[(String, PathBuf)], output: &Path) -> Result<()> {
    let contents = sections
        .iter()
        .map(|(name, path)| {
            fs::read(path)
                .with_context(|| format!("Failed to read {name} section: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let combined = combine(
        sections
            .iter()
            .zip(&contents)
            .map(|((name, _), content)| (name.as_str(), content.as_slice())),
    )?;
    fs::write(output, &combined)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} ({} bytes, {} sections aligned to {SECTION_ALIGN})",
            style("✓").green(),
            style(output.display()).green(),
            combined.len(),
            sections.len()
        );
    }
    Ok(())
}
