use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_REST_PORT: u16 = 4401;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// Daemon configuration, layered flag > env > `config.toml` > default.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// WebSocket change-feed port (BOARDD_PORT, default: 4400).
    pub port: u16,
    /// REST API port (BOARDD_REST_PORT, default: 4401).
    pub rest_port: u16,
    /// Data directory holding the SQLite database and config.toml.
    pub data_dir: PathBuf,
    /// Log filter (trace, debug, info, warn, error).
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for both servers (default: "127.0.0.1"; use 0.0.0.0 for
    /// LAN access).
    pub bind_address: String,
}

/// Optional `config.toml` in the data directory, the lowest-priority
/// override layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct TomlConfig {
    port: Option<u16>,
    rest_port: Option<u16>,
    log: Option<String>,
    log_format: Option<String>,
    bind_address: Option<String>,
}

impl BoardConfig {
    pub fn new(
        port: Option<u16>,
        rest_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        Self {
            port: port.or(toml.port).unwrap_or(DEFAULT_PORT),
            rest_port: rest_port.or(toml.rest_port).unwrap_or(DEFAULT_REST_PORT),
            log: log.or(toml.log).unwrap_or_else(|| "info".to_string()),
            log_format: toml
                .log_format
                .unwrap_or_else(|| "pretty".to_string()),
            bind_address: bind_address
                .or(toml.bind_address)
                .unwrap_or_else(default_bind_address),
            data_dir,
        }
    }
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml, using defaults");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/boardd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("boardd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/boardd or ~/.local/share/boardd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("boardd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("boardd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("boardd");
        }
    }
    PathBuf::from(".boardd")
}
