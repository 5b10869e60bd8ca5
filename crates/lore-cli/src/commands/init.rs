//! Initialize Lore.

use super::get_paths;
use anyhow::{Context, Result};
use colored::Colorize;
use lore_config::Config;
use lore_db::Database;

pub fn run() -> Result<()> {
    let paths = get_paths()?;

    if paths.config_file.exists() {
        let config = Config::load_from(&paths.config_file).context("Failed to load config")?;
        let paths = config.paths()?;
        if paths.database_file.exists() {
            println!("{} Lore is already initialized.", "Note:".yellow().bold());
            println!("  Config: {}", paths.config_file.display());
            println!("  Database: {}", paths.database_file.display());
            return Ok(());
        }
    }

    println!("{}", "Initializing Lore...".cyan().bold());

    paths.ensure_dirs().context("Failed to create directories")?;
    println!("  {} Created directories", "✓".green());

    if !paths.config_file.exists() {
        Config::create_default_file(&paths.config_file).context("Failed to create config file")?;
        println!("  {} Created config: {}", "✓".green(), paths.config_file.display());
    }

    let config = Config::load_from(&paths.config_file).context("Failed to load config")?;
    let data_paths = config.paths()?;
    data_paths.ensure_dirs().context("Failed to create data directory")?;
    let _db = Database::open(&data_paths.database_file).context("Failed to initialize database")?;
    println!(
        "  {} Created database: {}",
        "✓".green(),
        data_paths.database_file.display()
    );

    println!();
    println!("{}", "Lore initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Create a knowledge base: {}", "lore kb create handbook".cyan());
    println!("  2. Sync a folder into it: {}", "lore sync handbook ~/Documents/handbook".cyan());
    println!("  3. Ask a question: {}", "lore query \"how do I request leave?\"".cyan());

    Ok(())
}
