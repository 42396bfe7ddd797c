use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::warn;

const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    /// Listener for the internal broadcast endpoint. Keep it off public
    /// interfaces.
    pub internal_bind: String,
    pub database_url: String,
    /// Set when list coordinators run in another process; events are then
    /// forwarded over HTTP instead of delivered in-process.
    pub coordinator_url: Option<String>,
    pub broadcast_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            internal_bind: "127.0.0.1:8081".into(),
            database_url: "sqlite://./data/watchlist.db".into(),
            coordinator_url: None,
            broadcast_timeout_ms: 2_000,
        }
    }
}

impl Settings {
    /// Defaults, then the flat `server.toml` keys, then environment variables.
    pub fn from_sources(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Settings::default();

        if let Some(raw) = file {
            match toml::from_str::<toml::Table>(raw) {
                Ok(table) => {
                    let file_cfg: HashMap<&str, String> = table
                        .iter()
                        .filter_map(|(key, value)| scalar(value).map(|v| (key.as_str(), v)))
                        .collect();
                    if let Some(v) = file_cfg.get("bind_addr") {
                        settings.server_bind = v.clone();
                    }
                    if let Some(v) = file_cfg.get("internal_bind_addr") {
                        settings.internal_bind = v.clone();
                    }
                    if let Some(v) = file_cfg.get("database_url") {
                        settings.database_url = v.clone();
                    }
                    if let Some(v) = file_cfg.get("coordinator_url") {
                        settings.coordinator_url = Some(v.clone()).filter(|url| !url.trim().is_empty());
                    }
                    if let Some(v) = file_cfg.get("broadcast_timeout_ms") {
                        settings.set_broadcast_timeout(v);
                    }
                }
                Err(error) => warn!(%error, "ignoring unreadable {CONFIG_FILE}"),
            }
        }

        if let Some(v) = env("SERVER_BIND") {
            settings.server_bind = v;
        }
        if let Some(v) = env("APP__BIND_ADDR") {
            settings.server_bind = v;
        }

        if let Some(v) = env("APP__INTERNAL_BIND_ADDR") {
            settings.internal_bind = v;
        }

        if let Some(v) = env("DATABASE_URL") {
            settings.database_url = v;
        }
        if let Some(v) = env("APP__DATABASE_URL") {
            settings.database_url = v;
        }

        if let Some(v) = env("APP__COORDINATOR_URL") {
            settings.coordinator_url = Some(v).filter(|url| !url.trim().is_empty());
        }
        if let Some(v) = env("APP__BROADCAST_TIMEOUT_MS") {
            settings.set_broadcast_timeout(&v);
        }

        settings
    }

    fn set_broadcast_timeout(&mut self, raw: &str) {
        match raw.trim().parse::<u64>() {
            Ok(ms) => self.broadcast_timeout_ms = ms,
            Err(_) => warn!(value = raw, "ignoring invalid broadcast timeout"),
        }
    }
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    Settings::from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
