//! Firmware upgrade command.

use {
    super::connect,
    crate::{Cli, CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    indicatif::{MultiProgress, ProgressBar, ProgressStyle},
    insflash::UpgradeEvent,
    log::debug,
    std::{collections::HashMap, path::Path},
};

/// Renders upgrade events as one progress bar per worker.
struct ProgressView {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    quiet: bool,
}

impl ProgressView {
    fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            quiet,
        }
    }

    fn on_event(&mut self, event: &UpgradeEvent) {
        match event {
            UpgradeEvent::WorkerStarted { key, name, total } => {
                let bar = if self.quiet {
                    ProgressBar::hidden()
                } else if *total == 0 {
                    self.multi.add(ProgressBar::new_spinner())
                } else {
                    let bar = self.multi.add(ProgressBar::new(*total as u64));
                    #[allow(clippy::unwrap_used)] // Static template string
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template(
                                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                            )
                            .unwrap()
                            .progress_chars("#>-"),
                    );
                    bar
                };
                bar.set_message(name.clone());
                self.bars.insert(key.clone(), bar);
            },
            UpgradeEvent::Progress { key, offset, .. } => {
                if let Some(bar) = self.bars.get(key) {
                    bar.set_position(*offset as u64);
                }
            },
            UpgradeEvent::Finish { key } => {
                if let Some(bar) = self.bars.get(key) {
                    bar.finish_with_message(format!("{} {key}", style("✓").green()));
                }
            },
            UpgradeEvent::Error { key, reason } => {
                if let Some(bar) = self.bars.get(key) {
                    bar.abandon_with_message(format!("{} {key}: {reason}", style("✗").red()));
                }
            },
            other => debug!("{other:?}"),
        }
    }
}

/// Upgrade the unit from a combined image.
pub(crate) fn cmd_upgrade(
    cli: &Cli,
    config: &Config,
    image: &Path,
    targets: &[String],
) -> Result<()> {
    // Fail on a bad path before touching the link.
    if !image.is_file() {
        anyhow::bail!("Image not found: {}", image.display());
    }

    let mut driver = connect(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Upgrading from {}",
            style("📦").cyan(),
            style(image.display()).green()
        );
    }

    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
    let mut view = ProgressView::new(cli.quiet);
    let result = driver.start_upgrade(image, &targets, &mut |event| view.on_event(event));

    match result {
        Ok(()) => {
            if !cli.quiet {
                eprintln!("\n{} Upgrade completed", style("🎉").green().bold());
            }
            Ok(())
        },
        Err(insflash::Error::Stopped) => {
            Err(CliError::Cancelled("Upgrade stopped by user".to_string()).into())
        },
        Err(e) => Err(e).context("Upgrade failed"),
    }
}
