//! Configuration commands.

use super::get_paths;
use anyhow::{Context, Result};
use colored::Colorize;
use lore_config::Config;

pub fn show() -> Result<()> {
    let paths = get_paths()?;

    println!("{}", "Current Configuration".cyan().bold());
    println!("{}", "─".repeat(50));

    if paths.config_file.exists() {
        let contents =
            std::fs::read_to_string(&paths.config_file).context("Failed to read config file")?;
        // Parse to surface errors before printing
        Config::load_from(&paths.config_file).context("Config file is invalid")?;
        println!("{}", contents);
    } else {
        println!("{}", "No config file; using defaults.".dimmed());
        println!();
        println!("{}", Config::default_config_string());
    }

    Ok(())
}

pub fn path() -> Result<()> {
    let paths = get_paths()?;
    println!("{}", paths.config_file.display());
    Ok(())
}
