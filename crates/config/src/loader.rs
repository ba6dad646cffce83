use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{Context, Error, Result, env_subst::substitute_env, schema::ConnectionConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<ConnectionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Parse config text, picking the format from the file extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<ConnectionConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::message(format!("unsupported config format: .{ext}"))),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/courier/courier.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ConnectionConfig::default()` if no config file is found or the
/// file fails to parse; `COURIER_*` overrides apply either way.
pub fn discover_and_load() -> ConnectionConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                ConnectionConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            ConnectionConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/courier/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Returns the directory store files live in when none is configured.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "courier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

/// Apply `COURIER_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut ConnectionConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(
    config: &mut ConnectionConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = get("COURIER_SERVER_HOST") {
        config.server_host = v;
    }
    if let Some(v) = get("COURIER_SOCKET_PROTOCOL") {
        config.socket_protocol = v;
    }
    if let Some(v) = get("COURIER_BRIDGE_TYPE") {
        config.bridge_type = v;
    }
    if let Some(v) = get("COURIER_APPLICATION_ID") {
        config.application_id = v;
    }
    if let Some(v) = get("COURIER_SENDER_ID") {
        config.sender_id = v;
    }
    if let Some(v) = get("COURIER_ENCRYPTION_KEY") {
        config.encryption_key = Some(Secret::new(v));
    }
    if let Some(v) = get("COURIER_REGISTRATION_TOKEN") {
        config.registration_token = Some(v);
    }
    if let Some(v) = get("COURIER_DATA_DIR") {
        config.storage.data_dir = Some(PathBuf::from(v));
    }
}
