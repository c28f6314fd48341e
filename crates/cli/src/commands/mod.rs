pub mod config_cmd;
pub mod refs;
pub mod session;

use std::path::Path;

use roundclaw_config::AppConfig;
use roundclaw_core::SessionKey;

/// Parse `<channel>/<chat_id>` into a session key.
pub fn parse_session(raw: &str) -> Result<SessionKey, String> {
    let (channel, chat_id) = raw
        .split_once('/')
        .ok_or_else(|| format!("expected <channel>/<chat_id>, got '{raw}'"))?;
    SessionKey::new(channel, chat_id).map_err(|e| e.to_string())
}

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// First line of `text`, cut to `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push_str(" ...");
    }
    out
}
