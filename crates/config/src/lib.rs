//! Configuration loading, validation, and env substitution.
//!
//! Config files: `inlet.toml`, `inlet.yaml`, `inlet.yml` or `inlet.json`,
//! searched in `./` then `~/.config/inlet/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file and `INLET_*`
//! overrides applied after parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{BrokerConfig, BrokerKind, InletConfig, MAX_CONCURRENCY, MetricsConfig, ReceiverConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config, validate_str},
};
