//! apuctl Daemon (apuctld)
//!
//! Privileged service owning the APU power envelope. Applies the default
//! profile at startup, switches profiles when trigger processes come and go,
//! and serves unprivileged clients over a Unix domain socket.
//!
//! # Lifecycle
//! - **Startup**: logging, privilege check, config, hardware discovery (fatal if absent)
//! - **Default profile**: applied with `activatedBy = startup`, created in memory if missing
//! - **Watcher**: process-triggered switching when enabled
//! - **Shutdown**: SIGINT/SIGTERM stop the server and watcher, then the SMU handle is released

mod dispatch;
mod server;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use apu_core::{
    activate_profile, DaemonConfig, EventBus, JsonDirStore, ProcessWatcher, ProcfsScanner, ProfileManager,
    ServerState,
};
use apu_hw::{AmdApuStrategy, HardwareStrategy, StrategyOptions};
use apu_protocol::{ActivatedBy, Profile};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter environment variable
const LOG_ENV: &str = "APUCTL_LOG";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "apuctld", version, about = "AMD APU power profile daemon")]
struct Cli {
    /// Configuration file (default: $APUCTL_CONFIG, /etc/apuctl/config.json, then the user config dir)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Socket path, overriding the configuration
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Log to stdout even when the systemd journal is available
    #[arg(short, long)]
    foreground: bool,
}

// ============================================================================
// Startup
// ============================================================================

/// Journald when available, otherwise stdout. Returns whether journald is used.
fn init_logging(foreground: bool) -> bool {
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());

    if !foreground && std::path::Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();
    false
}

/// SMU and sysfs writes need root
fn verify_privileges() -> anyhow::Result<()> {
    // SAFETY: geteuid and getuid are always safe - they just return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        anyhow::bail!("apuctld must run as root (euid=0) for hardware access");
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }
    debug!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<DaemonConfig> {
    let path = DaemonConfig::resolve_path(cli.config.as_deref());
    let mut config =
        DaemonConfig::load(&path).with_context(|| format!("Failed to load configuration {}", path.display()))?;
    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => info!("SIGNAL: Received SIGINT - initiating shutdown"),
        _ = terminate => info!("SIGNAL: Received SIGTERM - initiating shutdown"),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let use_journald = init_logging(cli.foreground);

    info!("STARTUP: apuctld {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    verify_privileges()?;
    let config = load_config(&cli)?;
    info!("STARTUP: Socket path: {}", config.socket_path.display());
    info!("STARTUP: Profiles directory: {}", config.profiles_dir.display());

    // Hardware absence is fatal
    let hardware: Arc<dyn HardwareStrategy> = Arc::new(
        AmdApuStrategy::new(StrategyOptions {
            library_path: config.ryzenadj_library.clone(),
            power_profile_tool: config.power_profile_tool.clone(),
            limits: config.hardware_limits,
            ..StrategyOptions::default()
        })
        .context("Hardware initialisation failed")?,
    );
    info!("STARTUP: Hardware backend: {}", hardware.name());

    let events = EventBus::default();
    let manager = Arc::new(ProfileManager::new(
        hardware.clone(),
        Arc::new(JsonDirStore::new(&config.profiles_dir)),
        events.clone(),
    ));
    if let Err(e) = manager.load() {
        error!("Failed to load profiles from {}: {}", config.profiles_dir.display(), e);
    }
    if !manager.contains(&config.default_profile) {
        warn!(
            "Default profile {} not found, using a built-in passthrough profile",
            config.default_profile
        );
        manager.insert_transient(Profile::passthrough(config.default_profile.as_str()));
    }

    let state = ServerState::shared(config.clone());
    if let Err(e) =
        activate_profile(&manager, &state, &events, &config.default_profile, ActivatedBy::Startup).await
    {
        error!(profile = %config.default_profile, "Failed to apply default profile: {}", e);
    }

    let watcher = config.watcher_enabled.then(|| {
        let watcher = Arc::new(ProcessWatcher::new(
            manager.clone(),
            state.clone(),
            events.clone(),
            Arc::new(ProcfsScanner::default()),
            config.poll_interval_ms,
            config.debounce_threshold,
        ));
        watcher.start();
        watcher
    });
    if watcher.is_none() {
        info!("Process watcher disabled by configuration");
    }

    let dispatcher = Arc::new(dispatch::Dispatcher::new(manager.clone(), state.clone(), events.clone()));
    let result = server::run_server(&config.socket_path, dispatcher, events, shutdown_signal()).await;

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    hardware.destroy();

    result.context("Socket server failed")?;
    info!("SHUTDOWN: apuctld terminated gracefully");
    Ok(())
}
