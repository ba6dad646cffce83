use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    courier_config::{ConnectionConfig, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the effective configuration and report errors/warnings.
    Check,
    /// Print the effective configuration as TOML (secrets masked).
    Show,
    /// Print where config and store files are looked up.
    Paths,
}

/// Load the config file (explicit or discovered) with `COURIER_*` overrides,
/// then apply the command-line data directory.
pub fn load(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<ConnectionConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = courier_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            courier_config::apply_env_overrides(&mut config);
            config
        },
        None => courier_config::discover_and_load(),
    };
    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

pub fn handle_config(config: &ConnectionConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => check(config),
        ConfigAction::Show => {
            println!("{}", render(config)?);
            Ok(())
        },
        ConfigAction::Paths => {
            match courier_config::config_dir() {
                Some(dir) => println!("config dir: {}", dir.display()),
                None => println!("config dir: unavailable"),
            }
            let data_dir = config
                .storage
                .data_dir
                .clone()
                .unwrap_or_else(courier_config::data_dir);
            println!("store:      {}", data_dir.join(config.store_file_name()).display());
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &ConnectionConfig) -> Result<()> {
    let result = config.validate();

    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.field, d.message);
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("\n{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn render(config: &ConnectionConfig) -> Result<String> {
    let mut masked = config.clone();
    if masked.encryption_key.is_some() {
        masked = masked.with_encryption_key("********");
    }
    if masked.registration_token.is_some() {
        masked.registration_token = Some("********".into());
    }
    toml::to_string_pretty(&masked).context("failed to render config")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_secrets() {
        let mut config = ConnectionConfig::new("app1", "sender1").with_encryption_key("s3cret");
        config.registration_token = Some("native-token".into());
        let rendered = render(&config).unwrap();
        assert!(rendered.contains("application_id = \"app1\""));
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("native-token"));
    }

    #[test]
    fn explicit_file_and_data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("push.toml");
        std::fs::write(&path, "application_id = \"app1\"\nsender_id = \"sender1\"\n").unwrap();

        let config = load(Some(&path), Some(dir.path().join("store"))).unwrap();
        assert_eq!(config.application_id, "app1");
        assert_eq!(config.storage.data_dir, Some(dir.path().join("store")));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/courier.toml")), None).is_err());
    }
}
