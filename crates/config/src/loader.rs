use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::InletConfig,
};

/// Standard config file names, checked in order.
pub const CONFIG_FILENAMES: &[&str] = &["inlet.toml", "inlet.yaml", "inlet.yml", "inlet.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<InletConfig> {
    let raw = read_substituted(path)?;
    parse_config(&raw, extension(path))
}

/// Discover and load config from standard locations, then apply env
/// overrides.
///
/// Search order:
/// 1. `./inlet.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/inlet/inlet.{toml,yaml,yml,json}` (user-global)
///
/// Starts from `InletConfig::default()` if no config file is found. A file
/// that exists but cannot be parsed is an error.
pub fn discover_and_load() -> Result<InletConfig> {
    let config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        load_config(&path)?
    } else {
        debug!("no config file found, using defaults");
        InletConfig::default()
    };
    apply_env_overrides(config)
}

/// Find the first config file in standard locations.
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/inlet/`).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "inlet").map(|d| d.config_dir().to_path_buf())
}

/// Apply `INLET_*` environment variable overrides on top of file config.
///
/// - `INLET_RECEIVER_NAME` → `receiver.name`
/// - `INLET_RECEIVER_ADDRESS` → `receiver.address`
/// - `INLET_MAX_CONCURRENCY` → `receiver.max_concurrency`
/// - `INLET_BROKER_URI` → `broker.uri`
pub fn apply_env_overrides(config: InletConfig) -> Result<InletConfig> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: InletConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<InletConfig> {
    if let Some(name) = lookup("INLET_RECEIVER_NAME") {
        config.receiver.name = name;
    }
    if let Some(address) = lookup("INLET_RECEIVER_ADDRESS") {
        config.receiver.address = address;
    }
    if let Some(raw) = lookup("INLET_MAX_CONCURRENCY") {
        config.receiver.max_concurrency = raw.trim().parse().map_err(|_| {
            Error::invalid(
                "receiver.max_concurrency",
                format!("must be a positive integer (INLET_MAX_CONCURRENCY={raw})"),
            )
        })?;
    }
    if let Some(uri) = lookup("INLET_BROKER_URI") {
        config.broker.uri = Some(secrecy::Secret::new(uri));
    }
    Ok(config)
}

fn read_substituted(path: &Path) -> Result<String> {
    let raw = read_raw(path)?;
    Ok(substitute_env(&raw))
}

pub(crate) fn read_raw(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub(crate) fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, extension: &str) -> Result<InletConfig> {
    match extension {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

pub(crate) fn parse_config_value(raw: &str, extension: &str) -> Result<serde_json::Value> {
    match extension {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
