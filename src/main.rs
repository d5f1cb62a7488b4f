use std::{
    panic, process,
    sync::{Arc, OnceLock},
    time::Duration,
};

use llapbridge::{
    config::Config,
    core::{
        bridge::{Bridge, BridgeExit},
        source::SerialSource,
    },
    logger::LoggerManager,
    print_error,
};
use llapbridge_mqtt::{
    ConnectionState, ControlChannel, CredentialManager, PublishDrain, PublishSession,
    TransferError,
};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_STARTUP: i32 = 1;
const EXIT_INTERRUPTED: i32 = 2;
const EXIT_SIGNING: i32 = 3;
const EXIT_FAULT: i32 = 99;

/// Time in-flight publishes get to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(EXIT_STARTUP);
        })
    })
}

type ControlTask = JoinHandle<Result<(), TransferError>>;

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        default_hook(info);
        error!("Internal fault: {info}");
        process::exit(EXIT_FAULT);
    }));
}

fn log_state_changes(name: &'static str, mut rx: watch::Receiver<ConnectionState>) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            debug!("{name} connection: {state}");
        }
    });
}

async fn join_control(task: &mut Option<ControlTask>) -> Result<Result<(), TransferError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

/// Waits for a cancelled control channel to disconnect. Returns whether it
/// ended cleanly within `grace`.
async fn stop_control(task: ControlTask, grace: Duration) -> bool {
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            warn!("Control channel ended with error: {e}");
            false
        }
        Ok(Err(e)) => {
            error!("Control channel task failed: {e}");
            false
        }
        Err(_) => {
            warn!("Control channel did not disconnect within {:?}", grace);
            false
        }
    }
}

#[tokio::main]
async fn main() {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(EXIT_STARTUP);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(EXIT_STARTUP);
    });
    info!("Starting llapbridge version {}...", env!("CARGO_PKG_VERSION"));
    debug!("{:#?}", cfg.transport);
    info!("Log level: {}", cfg.logger.level);

    // A key that cannot sign now will not sign later either.
    if let Err(e) = CredentialManager::from_config(&cfg.transport).issue() {
        error!("Cannot sign device credential: {e}");
        process::exit(EXIT_SIGNING);
    }

    let source = SerialSource::open(&cfg.serial).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(EXIT_STARTUP);
    });

    install_panic_hook();

    let session = Arc::new(PublishSession::from_config(&cfg.transport));
    log_state_changes("Publish", session.subscribe_state());

    let control_cancel = CancellationToken::new();
    let mut control_task: Option<ControlTask> = if cfg.transport.subscribe_config {
        let control = ControlChannel::from_config(&cfg.transport, control_cancel.clone());
        log_state_changes("Control", control.subscribe_state());
        Some(tokio::spawn(control.run()))
    } else {
        info!("Config subscription disabled");
        None
    };

    let cancel = CancellationToken::new();
    let drain = Arc::new(PublishDrain::new());
    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::from_config(cfg, session, drain.clone(), fault_tx);
    let mut bridge_task = tokio::spawn(bridge.run(source, cancel.clone()));
    let mut bridge_running = true;

    let code = loop {
        tokio::select! {
            res = &mut bridge_task, if bridge_running => {
                bridge_running = false;
                break match res {
                    Ok(BridgeExit::SourceEnded | BridgeExit::Cancelled) => EXIT_OK,
                    Err(e) => {
                        error!("Bridge task failed: {e}");
                        EXIT_FAULT
                    }
                };
            }
            Some(fault) = fault_rx.recv() => {
                error!("Stopping, credential signing failed: {fault}");
                break EXIT_SIGNING;
            }
            res = join_control(&mut control_task) => {
                control_task = None;
                match res {
                    Ok(Ok(())) => info!("Control channel stopped"),
                    Ok(Err(e)) if e.is_fatal() => {
                        error!("Control channel cannot sign credentials: {e}");
                        break EXIT_SIGNING;
                    }
                    Ok(Err(e)) => error!("Control channel stopped: {e}"),
                    Err(e) => {
                        error!("Control channel task failed: {e}");
                        break EXIT_FAULT;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
                break EXIT_INTERRUPTED;
            }
        }
    };

    cancel.cancel();
    if bridge_running {
        if let Err(e) = bridge_task.await {
            error!("Bridge task failed during shutdown: {e}");
        }
    }

    let inflight = drain.inflight();
    if inflight > 0 {
        info!("Waiting for {inflight} in-flight publishes...");
        if tokio::time::timeout(SHUTDOWN_GRACE, drain.wait_idle()).await.is_err() {
            warn!("{} publishes still in flight after {:?}", drain.inflight(), SHUTDOWN_GRACE);
        }
    }

    control_cancel.cancel();
    if let Some(task) = control_task {
        stop_control(task, SHUTDOWN_GRACE).await;
    }

    info!("Shutdown complete (exit code {code})");
    process::exit(code);
}
