use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use inlet_config::validate::{self, Diagnostic, Severity};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the config file and report problems.
    Check {
        /// Also show informational notes.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective config (file plus `INLET_*` overrides) as TOML,
    /// with secrets redacted.
    Show,
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(config_path, verbose),
        ConfigAction::Show => show(config_path),
    }
}

fn colour(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "\x1b[1;31m",
        Severity::Warning => "\x1b[1;33m",
        Severity::Info => "\x1b[1;36m",
    }
}

const RESET: &str = "\x1b[0m";

fn render(d: &Diagnostic) -> String {
    let location = if d.path.is_empty() {
        String::new()
    } else {
        format!("{}: ", d.path)
    };
    format!(
        "  {}{}{RESET} [{}] {location}{}",
        colour(d.severity),
        d.severity,
        d.category,
        d.message
    )
}

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut result = validate::validate(config_path);
    match &result.config_path {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    result.diagnostics.sort_by_key(|d| d.severity);
    let shown: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(render)
        .collect();
    for line in &shown {
        eprintln!("{line}");
    }
    if !shown.is_empty() {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors + warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn show(config_path: Option<&Path>) -> Result<()> {
    let config = crate::load_config(config_path)?;
    print!("{}", config.redacted().to_toml_string()?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_path_and_category() {
        let result = validate::validate_str("[receiver]\nname = \"r\"\n", "toml");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "receiver.address")
            .unwrap();
        let line = render(d);
        assert!(line.contains("error"));
        assert!(line.contains("[invalid-value] receiver.address: must not be empty"));
    }
}
