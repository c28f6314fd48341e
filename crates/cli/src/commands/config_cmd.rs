//! `roundclaw config`: configuration management.

use std::path::{Path, PathBuf};

use roundclaw_config::AppConfig;

use super::load_config;

fn config_file(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_file(config_path);
    let config = load_config(config_path).map_err(|e| format!("{}: {e}", path.display()))?;

    println!("Config OK: {}", path.display());
    println!("  Workspace:  {}", config.workspace.display());
    println!("  Model:      {}", config.model);
    println!("  Max rounds: {}", config.agent.max_rounds);
    println!(
        "  Window:     {} tokens (compact above {}, summarize above {})",
        config.context.window_tokens,
        config.context.compact_threshold_tokens(),
        config.context.summarize_threshold_tokens()
    );
    println!(
        "  AOF:        {}",
        if config.session.aof_write_through {
            "write-through".to_string()
        } else {
            format!("buffered, flushed every {}s", config.session.flush_interval_secs)
        }
    );
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", config_file(config_path).display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        assert_eq!(config_file(Some(Path::new("/tmp/rc.toml"))), PathBuf::from("/tmp/rc.toml"));
        assert!(config_file(None).ends_with(".roundclaw/config.toml"));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_rounds = 0\n").unwrap();
        assert!(validate(Some(&path)).is_err());
    }
}
