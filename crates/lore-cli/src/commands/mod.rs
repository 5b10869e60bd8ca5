//! CLI command implementations.

pub mod config;
pub mod init;
pub mod kb;
pub mod query;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use lore_config::{AppPaths, Config};
use lore_db::Database;
use lore_ingest::Engine;

/// Get the application paths.
pub fn get_paths() -> Result<AppPaths> {
    AppPaths::new().context("Failed to determine application directories")
}

/// Load the configuration file, falling back to defaults when absent.
pub fn load_config() -> Result<Config> {
    let paths = get_paths()?;
    Config::load_from(&paths.config_file).context("Failed to load config")
}

/// Get a database connection, ensuring lore is initialized.
pub fn get_database(config: &Config) -> Result<Database> {
    let paths = config.paths()?;

    if !paths.database_file.exists() {
        anyhow::bail!("Lore is not initialized. Run 'lore init' first.");
    }

    Database::open(&paths.database_file).context("Failed to open database")
}

/// Open the engine over the configured database.
pub fn open_engine() -> Result<(Engine, Config)> {
    let config = load_config()?;
    let db = get_database(&config)?;
    let engine = Engine::new(db, &config).context("Failed to open knowledge bases")?;
    Ok((engine, config))
}

/// Format a file size in human-readable form.
pub fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Shorten text to at most `max` characters for display.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short\n\ntext", 20), "short text");
        assert_eq!(preview("один два три четыре", 8), "один два...");
    }
}
