//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::LocalStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub realtime_key_present: bool,
}

/// Write a default config file and create the local storage database
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.paths.db_file = base_dir.join("local.db");
    config.paths.base_dir = base_dir;
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    let store = LocalStore::connect(&config).await?;
    drop(store);
    info!("Created local storage at {:?}", config.paths.db_file);

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        realtime_key_present: config.realtime.key().is_some(),
    })
}

pub fn print_init(report: &InitReport) {
    println!("✓ orbita initialized successfully");
    println!("  Config: {}", report.config_path);
    println!("  Local storage: {}", report.db_path);
    println!("\nNext steps:");
    println!("  1. Set ORBITA_API_URL, ORBITA_REALTIME_URL and ORBITA_REALTIME_KEY");
    if !report.realtime_key_present {
        println!("     (ORBITA_REALTIME_KEY is not set yet)");
    }
    println!("  2. Verify them: orbita check");
    println!("  3. Log in: orbita login <email>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir, force: bool) -> InitOptions {
        InitOptions {
            base_dir: dir.path().to_path_buf(),
            config_path: dir.path().join("config.toml"),
            force,
        }
    }

    #[tokio::test]
    async fn test_init_creates_config_and_storage() {
        let dir = TempDir::new().unwrap();
        let report = cmd_init(options(&dir, false)).await.unwrap();

        assert!(dir.path().join("config.toml").exists());
        assert!(dir.path().join("local.db").exists());
        assert!(report.db_path.ends_with("local.db"));

        let loaded = Config::load(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_initialized());
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        cmd_init(options(&dir, false)).await.unwrap();

        assert!(cmd_init(options(&dir, false)).await.is_err());
        assert!(cmd_init(options(&dir, true)).await.is_ok());
    }
}
