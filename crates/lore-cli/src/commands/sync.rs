//! Sync command - bring a knowledge base up to date with a directory.

use super::open_engine;
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use lore_core::Error;
use lore_ingest::{ArchiveLimits, FolderSource, SourceProvider, SyncReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub fn run(principal: &str, kb: &str, dir: &str, every: Option<u64>) -> Result<()> {
    let path = Path::new(dir);
    if !path.is_dir() {
        anyhow::bail!("Directory does not exist: {}", path.display());
    }

    let (engine, config) = open_engine()?;
    let mut folder =
        FolderSource::new(path, &config.sync.ignore_patterns).context("Invalid ignore pattern")?;
    if config.sync.expand_archives {
        folder = folder.with_archives(ArchiveLimits::from_config(&config.sync));
    }
    let source: Arc<dyn SourceProvider> = Arc::new(folder);

    let rt = Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl+C received, cancelling");
                on_ctrl_c.cancel();
            }
        });

        loop {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            pb.set_message(format!("Syncing {} from {}", kb, path.display()));
            pb.enable_steady_tick(Duration::from_millis(100));

            let result = engine.sync(principal, kb, source.clone(), cancel.clone()).await;
            pb.finish_and_clear();
            match result {
                Ok(report) => print_report(&report),
                Err(e) if keep_scheduling(&e, every) => {
                    warn!("Scheduled sync of {} failed: {}", kb, e);
                    eprintln!(
                        "{} {} ({})",
                        "Sync failed:".red().bold(),
                        e,
                        e.kind()
                    );
                    println!("{}", "Will retry on the next scheduled run.".dimmed());
                }
                Err(e) => return Err(e.into()),
            }

            let Some(secs) = every else { break };
            if cancel.is_cancelled() {
                break;
            }
            println!();
            println!(
                "{}",
                format!("Next sync in {}s. Press Ctrl+C to stop.", secs).dimmed()
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }

        Ok::<(), anyhow::Error>(())
    })
}

/// A scheduled run survives failures that a later pass can get past.
fn keep_scheduling(error: &Error, every: Option<u64>) -> bool {
    every.is_some() && error.is_transient()
}

fn print_report(report: &SyncReport) {
    let title = if report.cancelled {
        "Sync cancelled:".yellow().bold()
    } else {
        "Synced:".green().bold()
    };
    println!(
        "{} {} in {:.1}s",
        title,
        report.kb_name,
        report.duration.as_secs_f64()
    );

    println!("  Added: {}", report.added.to_string().green());
    println!("  Updated: {}", report.updated);
    println!("  Removed: {}", report.removed);
    println!("  Unchanged: {}", report.unchanged.to_string().dimmed());
    if report.retried > 0 {
        println!("  Retried: {}", report.retried);
    }
    if report.touched > 0 {
        println!("  Touched (content unchanged): {}", report.touched);
    }
    if let Some(version) = report.version {
        println!("  Version: {}", version);
    }

    if !report.partial.is_empty() {
        println!();
        println!("{}", "Partially Converted".yellow().bold());
        for origin in &report.partial {
            println!("  {} {}", "◐".yellow(), origin);
        }
    }

    if !report.failed.is_empty() {
        println!();
        println!("{}", "Failed".red().bold());
        for item in &report.failed {
            println!("  {} {}", "✗".red(), item.origin_id);
            println!(
                "    {}",
                format!("{}: {}", item.failure.kind, item.failure.reason).dimmed()
            );
        }
    }

    if report.cancelled {
        println!();
        println!(
            "{}",
            "Completed items were kept; the rest will be picked up by the next sync.".dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_sync_survives_source_outage() {
        let outage = Error::SourceUnavailable {
            origin: "/mnt/share/handbook".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert!(keep_scheduling(&outage, Some(300)));
        assert!(!keep_scheduling(&outage, None));

        let denied = Error::unauthorized("bob", "sync", "handbook");
        assert!(!keep_scheduling(&denied, Some(300)));
    }
}
