//! doormand - passcode-gated actuation daemon.
//!
//! Listens for channel events over HTTP, decides every access attempt
//! against a reloadable credential file and a per-source failure
//! scoreboard, and runs the configured actuation command for accepted
//! attempts. The decision engine lives in `doorman-core`; this binary
//! wires configuration, logging, the ingress listener and process
//! lifecycle around it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use doorman_core::actuator::CommandActuator;
use doorman_core::audit::{AuditLog, default_audit_path};
use doorman_core::config::DoormanConfig;
use doorman_core::credentials::CredentialStore;
use doorman_core::pipeline::{SharedPipeline, new_shared_pipeline};
use doorman_core::scoreboard::FailureScoreboard;
use doorman_daemon::ingress::{IngressState, router};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// doorman daemon - passcode-gated actuation
#[derive(Parser, Debug)]
#[command(name = "doormand")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "doorman.toml")]
    config: PathBuf,

    /// Credential file path (overrides the configuration file)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Audit log path (overrides the configuration file)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Listener bind address (overrides the configuration file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Interval between heartbeat lines reporting the event counter.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let config = load_config(&args)?;
    info!(
        config = %args.config.display(),
        bind = %config.listener.bind,
        channel = %config.listener.channel,
        event = %config.listener.event,
        credentials = %config.credentials.path.display(),
        command = %config.actuator.command,
        "Starting doorman daemon"
    );

    let pipeline = build_pipeline(&config)?;

    // Periodic liveness line so quiet deployments still show activity
    let heartbeat_pipeline = Arc::clone(&pipeline);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!(
                events_seen = heartbeat_pipeline.events_seen(),
                "doorman heartbeat"
            );
        }
    });

    let state = Arc::new(IngressState::new(
        Arc::clone(&pipeline),
        config.listener.channel.clone(),
        config.listener.event.clone(),
    ));
    let app = router(state, config.listener.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.listener.bind)
        .await
        .context("failed to bind event listener")?;
    info!(addr = %config.listener.bind, "Event listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("event listener error")?;

    info!(events_seen = pipeline.events_seen(), "Shutting down");
    Ok(())
}

/// Initialize logging from the command line arguments.
fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        // Log to file
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        // Log to stdout
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

/// Load the configuration file and apply command line overrides.
fn load_config(args: &Args) -> Result<DoormanConfig> {
    let mut config = DoormanConfig::from_file(&args.config).with_context(|| {
        format!(
            "failed to load configuration from {}",
            args.config.display()
        )
    })?;

    if let Some(bind) = args.bind {
        config.listener.bind = bind;
    }
    if let Some(credentials) = &args.credentials {
        config.credentials.path = credentials.clone();
    }
    if let Some(audit_log) = &args.audit_log {
        config.audit.path = Some(audit_log.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Wire the decision pipeline from the loaded configuration.
fn build_pipeline(config: &DoormanConfig) -> Result<SharedPipeline> {
    let credentials = CredentialStore::open(&config.credentials.path).with_context(|| {
        format!(
            "failed to load credential file {}",
            config.credentials.path.display()
        )
    })?;

    let audit_path = config.audit.path.clone().unwrap_or_else(default_audit_path);
    let audit = AuditLog::open(&audit_path)
        .with_context(|| format!("failed to open audit log {}", audit_path.display()))?;

    let actuator = Arc::new(CommandActuator::new(config.actuator_config()));
    let scoreboard = FailureScoreboard::new(config.scoreboard_config());

    Ok(new_shared_pipeline(credentials, scoreboard, actuator, audit))
}

/// Resolves when the process receives SIGTERM or SIGINT.
async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [listener]
        bind = "127.0.0.1:8585"

        [credentials]
        path = "passcodes"

        [actuator]
        command = "open-door"
    "#;

    fn write_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("doorman.toml");
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_load_config_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(&dir);

        let args = Args::parse_from(["doormand", "--config", config_path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.listener.bind.port(), 8585);
        assert_eq!(config.credentials.path, PathBuf::from("passcodes"));
        assert!(config.audit.path.is_none());
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(&dir);

        let args = Args::parse_from([
            "doormand",
            "--config",
            config_path.to_str().unwrap(),
            "--bind",
            "0.0.0.0:9999",
            "--credentials",
            "/etc/doorman/passcodes",
            "--audit-log",
            "/var/log/doorman/access.log",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.listener.bind.port(), 9999);
        assert_eq!(
            config.credentials.path,
            PathBuf::from("/etc/doorman/passcodes")
        );
        assert_eq!(
            config.audit.path,
            Some(PathBuf::from("/var/log/doorman/access.log"))
        );
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let args = Args::parse_from(["doormand", "--config", "/no/such/doorman.toml"]);
        assert!(load_config(&args).is_err());
    }
}
