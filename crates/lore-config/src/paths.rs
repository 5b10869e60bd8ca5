//! Application paths management.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Manages all application paths following platform conventions.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
}

impl AppPaths {
    /// Create paths using platform-specific directories.
    pub fn new() -> Option<Self> {
        let proj_dirs = ProjectDirs::from("com", "lore", "lore")?;

        let config_dir = proj_dirs.config_dir().to_path_buf();
        let data_dir = proj_dirs.data_dir().to_path_buf();

        Some(Self {
            config_file: config_dir.join("config.toml"),
            database_file: data_dir.join("lore.db"),
            config_dir,
            data_dir,
        })
    }

    /// Keep the config location but move data (database) under `data_dir`.
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self.database_file = self.data_dir.join("lore.db");
        self
    }

    /// All paths rooted under a single directory.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.to_path_buf(),
            data_dir: root.to_path_buf(),
            config_file: root.join("config.toml"),
            database_file: root.join("lore.db"),
        }
    }

    /// Create all necessary directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Check if lore has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_paths_creation() {
        let paths = AppPaths::new();
        assert!(paths.is_some());

        let paths = paths.unwrap();
        assert!(paths.config_file.to_string_lossy().contains("config.toml"));
        assert!(paths.database_file.to_string_lossy().contains("lore.db"));
    }

    #[test]
    fn test_data_dir_override() {
        let paths = AppPaths::rooted_at("/tmp/a").with_data_dir("/srv/lore");
        assert_eq!(paths.database_file, PathBuf::from("/srv/lore/lore.db"));
        assert_eq!(paths.config_file, PathBuf::from("/tmp/a/config.toml"));
    }

    #[test]
    fn test_rooted_paths_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path().join("lore"));
        assert!(!paths.is_initialized());

        paths.ensure_dirs().unwrap();
        std::fs::write(&paths.config_file, "").unwrap();
        std::fs::write(&paths.database_file, "").unwrap();
        assert!(paths.is_initialized());
    }
}
