//! Connection configuration: schema, loading, env substitution, validation.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `COURIER_*`
//! environment overrides for the identity fields.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Context, Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, load_config, parse_config,
    },
    schema::{ConnectionConfig, KdfConfig, StorageConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
