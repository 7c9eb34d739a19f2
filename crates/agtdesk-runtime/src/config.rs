//! Settings: CLI flags layered over an optional TOML file, then defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:7749/ws";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server_url: Option<String>,
    pub control_socket: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub home_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub control_socket: String,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    /// Collapsed to `~` in activity paths.
    pub home_dir: Option<String>,
}

/// `$XDG_CONFIG_HOME/agtdesk/config.toml`, else `~/.config/agtdesk/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join("agtdesk/config.toml"));
        }
    }
    std::env::var("HOME")
        .ok()
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".config/agtdesk/config.toml"))
}

/// Default control socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/agtdesk/control.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/agtdesk-{user}/control.sock")
}

/// Read a config file. A missing file is only an error when `required`.
pub fn load_file(path: &Path, required: bool) -> anyhow::Result<FileConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(FileConfig::default());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Merge flags over file values over defaults.
pub fn resolve(url: Option<String>, socket_path: Option<String>, file: FileConfig) -> Settings {
    Settings {
        server_url: url
            .or(file.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
        control_socket: socket_path
            .or(file.control_socket)
            .unwrap_or_else(default_socket_path),
        reconnect_delay: Duration::from_millis(
            file.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        ),
        request_timeout: Duration::from_millis(
            file.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        ),
        home_dir: file
            .home_dir
            .or_else(|| std::env::var("HOME").ok())
            .filter(|h| !h.is_empty()),
    }
}

pub fn load(cli: &Cli) -> anyhow::Result<Settings> {
    let file = match (&cli.config, default_config_path()) {
        (Some(path), _) => load_file(path, true)?,
        (None, Some(path)) => load_file(&path, false)?,
        (None, None) => FileConfig::default(),
    };
    let settings = resolve(cli.url.clone(), cli.socket_path.clone(), file);
    tracing::debug!(
        server_url = %settings.server_url,
        control_socket = %settings.control_socket,
        "settings resolved"
    );
    Ok(settings)
}
