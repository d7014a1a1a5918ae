//! Default paths for hearthd components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/hearthd/hearthd.sock` or `/tmp/hearthd-$USER/hearthd.sock`
//! - Data: `$XDG_DATA_HOME/hearthd` or `~/.local/share/hearthd`
//! - Config: `$XDG_CONFIG_HOME/hearth/config.toml` or `~/.config/hearth/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const HEARTH_SOCKET_ENV: &str = "HEARTH_SOCKET";

/// Environment variable for overriding the data directory
pub const HEARTH_DATA_DIR_ENV: &str = "HEARTH_DATA_DIR";

const SOCKET_FILENAME: &str = "hearthd.sock";
const APP_DIR: &str = "hearthd";
const CONFIG_DIR: &str = "hearth";

/// Socket path, honoring `$HEARTH_SOCKET` first.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(HEARTH_SOCKET_ENV) {
        return PathBuf::from(path);
    }
    socket_path_without_env()
}

/// Socket path ignoring `$HEARTH_SOCKET`; used as the config default.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Data directory, honoring `$HEARTH_DATA_DIR` first.
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(HEARTH_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }
    data_dir_without_env()
}

/// Data directory ignoring `$HEARTH_DATA_DIR`; used as the config default.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(CONFIG_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(CONFIG_DIR).join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_names_the_daemon() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("hearthd"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_names_the_daemon() {
        assert!(data_dir_without_env().to_string_lossy().contains("hearthd"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
