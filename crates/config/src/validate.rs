//! Diagnostics for config files.
//!
//! Reports problems in three passes: the document itself (syntax, unknown
//! keys, wrong types), then the settings the pipeline would refuse to start
//! with, then settings that work but are probably mistakes.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use secrecy::ExposeSecret;

use crate::{
    env_subst::{substitute_env, unresolved_placeholders},
    error::Error,
    loader::{apply_env_overrides, extension, find_config_file, parse_config_value, read_raw},
    schema::{BrokerKind, InletConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// One finding, located by dotted key path (empty for whole-file findings).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// One of `syntax`, `unknown-field`, `type-error`, `invalid-value`,
    /// `unresolved-env`, `security`, `file-ref`.
    pub category: &'static str,
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }

    fn error(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, path, message)
    }

    fn warning(
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, category, path, message)
    }

    fn info(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, path, message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    /// File that was checked; `None` when defaults were checked.
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Every section and the keys it accepts. Keep in sync with `schema.rs`.
const KNOWN_KEYS: &[(&str, &[&str])] = &[
    ("receiver", &[
        "name",
        "address",
        "max_concurrency",
        "receive_timeout_secs",
        "idle_pause_ms",
        "backoff_floor_ms",
        "backoff_ceiling_ms",
    ]),
    ("broker", &["kind", "uri", "prefetch"]),
    ("metrics", &["enabled"]),
];

/// Edit distance between `a` and `b`, counted in chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    // row[j] = distance between the prefix of `a` seen so far and b[..j]
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Closest candidate within three edits, if any.
fn closest<'a>(key: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|candidate| (levenshtein(key, candidate), candidate))
        .filter(|&(distance, _)| (1..=3).contains(&distance))
        .min_by_key(|&(distance, _)| distance)
        .map(|(_, candidate)| candidate)
}

/// Check the config file at `path`, or the one the loader would discover.
///
/// Semantic checks see the config the way the pipeline will, with `INLET_*`
/// overrides applied.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(config_path) = path.map(Path::to_path_buf).or_else(find_config_file) else {
        let mut diagnostics = vec![Diagnostic::info(
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        check_effective(InletConfig::default(), &mut diagnostics);
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let diagnostics = match read_raw(&config_path) {
        Ok(content) => {
            let (mut diagnostics, parsed) = check_document(&content, extension(&config_path));
            if let Some(config) = parsed {
                check_effective(config, &mut diagnostics);
            }
            diagnostics
        },
        Err(e) => vec![Diagnostic::error("file-ref", "", e.to_string())],
    };
    ValidationResult {
        diagnostics,
        config_path: Some(config_path),
    }
}

/// Check config text in `format` (`toml`, `yaml`, `yml`, `json`) without
/// reading files or the `INLET_*` environment.
#[must_use]
pub fn validate_str(content: &str, format: &str) -> ValidationResult {
    let (mut diagnostics, parsed) = check_document(content, format);
    if let Some(config) = parsed {
        diagnostics.extend(validate_config(&config));
    }
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &InletConfig) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = config
        .receiver
        .violations()
        .into_iter()
        .map(|violation| match violation {
            Error::Invalid { path, message } => Diagnostic::error("invalid-value", path, message),
            other => Diagnostic::error("invalid-value", "receiver", other.to_string()),
        })
        .collect();

    let receiver = &config.receiver;
    if receiver.backoff_ceiling_ms < receiver.backoff_floor_ms {
        diagnostics.push(Diagnostic::warning(
            "invalid-value",
            "receiver.backoff_ceiling_ms",
            format!(
                "ceiling {}ms is below floor {}ms; the floor is used as the ceiling",
                receiver.backoff_ceiling_ms, receiver.backoff_floor_ms
            ),
        ));
    }

    let broker = &config.broker;
    match (broker.kind, &broker.uri) {
        (BrokerKind::Rabbitmq, None) => diagnostics.push(Diagnostic::error(
            "invalid-value",
            "broker.uri",
            "required when broker.kind is \"rabbitmq\" (or set INLET_BROKER_URI)",
        )),
        (BrokerKind::Memory, Some(_)) => diagnostics.push(Diagnostic::info(
            "invalid-value",
            "broker.uri",
            "ignored by the memory broker",
        )),
        _ => {},
    }
    if let Some(uri) = &broker.uri {
        diagnostics.extend(check_uri(uri.expose_secret()));
    }

    if broker.prefetch > 0 && usize::from(broker.prefetch) < receiver.max_concurrency {
        diagnostics.push(Diagnostic::warning(
            "invalid-value",
            "broker.prefetch",
            format!(
                "prefetch {} is below max_concurrency {}; some workers will sit idle",
                broker.prefetch, receiver.max_concurrency
            ),
        ));
    }

    diagnostics
}

/// Document-level checks. Returns the parsed config when it deserializes.
fn check_document(content: &str, format: &str) -> (Vec<Diagnostic>, Option<InletConfig>) {
    let substituted = substitute_env(content);
    let mut diagnostics: Vec<Diagnostic> = unresolved_placeholders(&substituted)
        .into_iter()
        .map(|name| {
            Diagnostic::warning(
                "unresolved-env",
                "",
                format!("environment variable {name} is not set; ${{{name}}} kept literally"),
            )
        })
        .collect();

    let value = match parse_config_value(&substituted, format) {
        Ok(value) => value,
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                "syntax",
                "",
                format!("{format} syntax error: {e}"),
            ));
            return (diagnostics, None);
        },
    };

    diagnostics.extend(unknown_keys(&value));

    match serde_json::from_value::<InletConfig>(value) {
        Ok(config) => (diagnostics, Some(config)),
        Err(e) => {
            diagnostics.push(Diagnostic::error("type-error", "", format!("type error: {e}")));
            (diagnostics, None)
        },
    }
}

fn check_effective(config: InletConfig, diagnostics: &mut Vec<Diagnostic>) {
    match apply_env_overrides(config) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::error("invalid-value", "env", e.to_string())),
    }
}

/// Flag keys that are not part of the schema, suggesting the closest known
/// one. Sections with the wrong shape are left to the type check.
fn unknown_keys(value: &serde_json::Value) -> Vec<Diagnostic> {
    let Some(root) = value.as_object() else {
        return Vec::new();
    };

    let mut diagnostics = Vec::new();
    for (section, body) in root {
        let Some((_, keys)) = KNOWN_KEYS.iter().find(|(name, _)| *name == section.as_str()) else {
            let hint = closest(section, KNOWN_KEYS.iter().map(|(name, _)| *name));
            diagnostics.push(Diagnostic::error(
                "unknown-field",
                section.as_str(),
                unknown_message("unknown section", hint),
            ));
            continue;
        };
        let Some(fields) = body.as_object() else {
            continue;
        };
        for key in fields.keys().filter(|key| !keys.contains(&key.as_str())) {
            let hint = closest(key, keys.iter().copied());
            diagnostics.push(Diagnostic::error(
                "unknown-field",
                format!("{section}.{key}"),
                unknown_message("unknown field", hint),
            ));
        }
    }
    diagnostics
}

fn unknown_message(what: &str, hint: Option<&str>) -> String {
    match hint {
        Some(hint) => format!("{what} (did you mean \"{hint}\"?)"),
        None => what.to_string(),
    }
}

fn check_uri(uri: &str) -> Vec<Diagnostic> {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return vec![Diagnostic::error(
            "invalid-value",
            "broker.uri",
            "expected a URI like amqp://host:5672/%2f",
        )];
    };

    let mut diagnostics = Vec::new();
    if !matches!(scheme, "amqp" | "amqps") {
        diagnostics.push(Diagnostic::warning(
            "invalid-value",
            "broker.uri",
            format!("unexpected scheme \"{scheme}\"; expected amqp or amqps"),
        ));
    }
    let has_password = rest
        .split_once('@')
        .is_some_and(|(userinfo, _)| userinfo.contains(':'));
    if scheme == "amqp" && has_password {
        diagnostics.push(Diagnostic::warning(
            "security",
            "broker.uri",
            "credentials are sent unencrypted over amqp://; prefer amqps://",
        ));
    }
    diagnostics
}
