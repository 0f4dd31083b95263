//! Runs the redundancy manager locally, paired with a simulated sibling BMC.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rbmc_bus_memory::MemoryBus;
use rbmc_redundancy::{
    BusSibling, Manager, ManagerConfig, ManagerState, RelayConfig, SiblingConfig, SiblingRelay,
    Supervisor,
};
use rbmc_services::Services;
use rbmc_services_memory::MemoryServices;
use rbmc_services_systemd::{SystemdServices, SystemdServicesOptions};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, info};
use tracing_panic::panic_hook;
use tracing_subscriber::FmtSubscriber;

type SimulatedManager = Manager<MemoryBus, MemoryServices, BusSibling<MemoryBus>>;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Maximum log level
    #[arg(long, default_value_t = Level::INFO, env = "RBMC_LOG_LEVEL")]
    log_level: Level,

    /// This controller's slot position. With `--systemd` it is read from the
    /// firmware environment instead.
    #[arg(long, default_value_t = 0, env = "RBMC_POSITION", conflicts_with = "systemd")]
    position: usize,

    /// Slot position of the simulated sibling
    #[arg(long, default_value_t = 1, env = "RBMC_SIBLING_POSITION")]
    sibling_position: usize,

    /// Simulate an empty sibling slot
    #[arg(long, env = "RBMC_NO_SIBLING")]
    no_sibling: bool,

    /// Run as a single-controller chassis with no sibling slot at all
    #[arg(long, conflicts_with = "no_sibling")]
    single: bool,

    /// How long to wait for the sibling before determining the role
    #[arg(long, default_value_t = 360, env = "RBMC_SIBLING_WAIT_SECS")]
    sibling_wait_secs: u64,

    /// Heartbeat period
    #[arg(long, default_value_t = 1000, env = "RBMC_HEARTBEAT_INTERVAL_MS")]
    heartbeat_interval_ms: u64,

    /// Read this controller's facts from the system and start role targets
    /// through systemd
    #[arg(long)]
    systemd: bool,

    /// Path to `fw_printenv`, used with `--systemd`
    #[arg(long, default_value = "/sbin/fw_printenv", env = "RBMC_FW_PRINTENV")]
    fw_printenv_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .finish(),
    )?;
    std::panic::set_hook(Box::new(panic_hook));

    let config = ManagerConfig {
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        sibling_wait_timeout: Duration::from_secs(args.sibling_wait_secs),
        sibling: SiblingConfig {
            assume_hardware_present: !args.no_sibling,
            ..SiblingConfig::default()
        },
    };

    if args.systemd {
        let services = SystemdServices::new(SystemdServicesOptions {
            fw_printenv_path: args.fw_printenv_path.clone(),
            ..SystemdServicesOptions::default()
        });

        run(&args, config, services).await
    } else {
        run(&args, config, MemoryServices::with_position(args.position)).await
    }
}

async fn run<S>(args: &Args, config: ManagerConfig, services: S) -> Result<()>
where
    S: Services,
{
    let supervisor = Supervisor::new();
    let bus = MemoryBus::new();
    let services = Arc::new(services);

    let manager = if args.single {
        Manager::standalone(bus.connect().await, services, config.clone(), supervisor.clone())
    } else {
        Manager::with_bus_sibling(bus.connect().await, services, config.clone(), supervisor.clone())
    };

    let sibling = if args.single || args.no_sibling {
        None
    } else {
        Some(start_sibling(&bus, args.sibling_position, config, &supervisor).await?)
    };

    manager.start().await?;

    let running = tokio::select! {
        () = manager.wait_for_state(ManagerState::Running) => true,
        result = shutdown_signal() => {
            result?;
            false
        }
    };

    if running {
        if let Some(role_info) = manager.role_info() {
            info!("running as {} ({:?})", role_info.role, role_info.error);
        }

        if let Some(sibling) = &sibling {
            sibling.wait_for_state(ManagerState::Running).await;
            info!("simulated sibling is {}", sibling.role());
        }

        shutdown_signal().await?;
    }

    info!("shutting down");
    supervisor.shutdown().await;

    Ok(())
}

/// Starts a simulated sibling on its own bus, relayed both ways.
async fn start_sibling(
    local_bus: &MemoryBus,
    position: usize,
    config: ManagerConfig,
    supervisor: &Supervisor,
) -> Result<SimulatedManager> {
    let sibling_bus = MemoryBus::new();

    SiblingRelay::new(
        sibling_bus.connect().await,
        local_bus.connect().await,
        RelayConfig::default(),
        supervisor.clone(),
    )
    .start()
    .await?;

    SiblingRelay::new(
        local_bus.connect().await,
        sibling_bus.connect().await,
        RelayConfig::default(),
        supervisor.clone(),
    )
    .start()
    .await?;

    let sibling = Manager::with_bus_sibling(
        sibling_bus.connect().await,
        Arc::new(MemoryServices::with_position(position)),
        config,
        supervisor.clone(),
    );
    sibling.start().await?;

    Ok(sibling)
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| Error::Io("failed to install SIGTERM handler", e))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| Error::Io("failed to listen for ctrl-c", e))
        }
        _ = terminate.recv() => Ok(()),
    }
}
