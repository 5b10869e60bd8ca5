//! Status command - show knowledge bases, converters and external tools.

use super::{format_size, open_engine};
use anyhow::Result;
use colored::Colorize;
use lore_core::KnowledgeBaseState;
use lore_db::Database;

pub fn run(principal: &str) -> Result<()> {
    let (engine, config) = open_engine()?;
    let paths = config.paths()?;

    println!("{}", "Lore Status".cyan().bold());
    println!("{}", "─".repeat(50));

    println!();
    println!("{}", "Knowledge Bases".white().bold());
    let bases = engine.list_kbs(principal)?;
    if bases.is_empty() {
        println!(
            "  {}",
            "None readable. Create one with 'lore kb create <name>'.".dimmed()
        );
    }
    for kb in &bases {
        let icon = match kb.state {
            KnowledgeBaseState::Ready => "●".green(),
            KnowledgeBaseState::Syncing => "◐".blue(),
            KnowledgeBaseState::Empty => "○".yellow(),
            KnowledgeBaseState::Deleted => "✗".red(),
        };
        let stats = engine.stats(principal, &kb.id)?;
        println!(
            "  {} {} ({} documents, {} chunks{})",
            icon,
            kb.name,
            stats.documents,
            stats.chunks,
            if stats.failed > 0 {
                format!(", {} failed", stats.failed.to_string().red())
            } else {
                String::new()
            }
        );
    }

    println!();
    println!("{}", "Converters".white().bold());
    let enabled: Vec<String> = engine
        .capabilities()
        .iter()
        .map(|c| c.to_string())
        .collect();
    println!("  {}", enabled.join(", "));

    println!();
    println!("{}", "External Tools".white().bold());
    for (tool, available) in lore_process::check_dependencies() {
        if available {
            println!("  {} {}", "✓".green(), tool);
        } else {
            println!("  {} {} {}", "✗".red(), tool, "(not found)".dimmed());
        }
    }

    println!();
    println!("{}", "Storage".white().bold());
    if let Ok(size) = Database::file_size(&paths.database_file) {
        println!("  Database size: {}", format_size(size as i64));
    }
    println!("  Database: {}", paths.database_file.display());
    match engine.database().integrity_check() {
        Ok(true) => println!("  Integrity: {}", "ok".green()),
        Ok(false) => println!("  Integrity: {}", "damaged".red()),
        Err(e) => println!("  Integrity: {}", format!("unknown ({})", e).yellow()),
    }

    Ok(())
}
