mod config_commands;
mod pipeline_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    inlet_config::InletConfig,
    inlet_metrics::MetricsRecorderConfig,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::{config_commands::ConfigAction, pipeline_commands::SimulateArgs};

#[derive(Parser)]
#[command(name = "inlet", about = "Inlet: resilient message receive pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of searching the default locations.
    #[arg(long, global = true, env = "INLET_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive from the configured broker until interrupted.
    Run,
    /// Run the pipeline against an in-process broker with generated messages.
    Simulate(SimulateArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Logs go to stderr; stdout carries command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load config from `path` when given, otherwise from the standard
/// locations. `INLET_*` overrides apply either way.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<InletConfig> {
    let config = match path {
        Some(path) => {
            let config = inlet_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            inlet_config::apply_env_overrides(config)?
        },
        None => inlet_config::discover_and_load()?,
    };
    Ok(config)
}

/// Cancel `cancel` on Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {},
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("interrupt received, draining in-flight messages"),
                    Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
                }
                cancel.cancel();
            },
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "inlet starting");

    match cli.command {
        Commands::Config { action } => config_commands::handle_config(action, cli.config.as_deref()),
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            let metrics = inlet_metrics::init_metrics(MetricsRecorderConfig {
                enabled: config.metrics.enabled,
                global_labels: vec![("receiver".into(), config.receiver.name.clone())],
            })?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            pipeline_commands::run(config, cancel).await?;
            if metrics.is_recording() {
                print!("{}", metrics.render());
            }
            Ok(())
        },
        Commands::Simulate(args) => {
            let config = load_config(cli.config.as_deref())?;
            let metrics = inlet_metrics::init_metrics(MetricsRecorderConfig {
                enabled: config.metrics.enabled,
                ..Default::default()
            })?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            pipeline_commands::simulate(config, args, cancel).await?;
            if metrics.is_recording() {
                print!("{}", metrics.render());
            }
            Ok(())
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_simulate_flags() {
        let cli = Cli::try_parse_from([
            "inlet",
            "simulate",
            "--messages",
            "5",
            "--fail-every",
            "2",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.messages, 5);
        assert_eq!(args.fail_every.map(std::num::NonZeroU64::get), Some(2));
        assert_eq!(args.link_failures, 0);
    }

    #[test]
    fn fail_every_rejects_zero() {
        assert!(Cli::try_parse_from(["inlet", "simulate", "--fail-every", "0"]).is_err());
    }

    #[test]
    fn parses_config_check() {
        let cli = Cli::try_parse_from(["inlet", "config", "check", "--verbose"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Check { verbose: true }
            }
        ));
    }
}
