use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use floorbook::archive::JsonlArchive;
use floorbook::auth::PasswordAuth;
use floorbook::engine::{Engine, InMemoryStore};
use floorbook::registry::TableRegistry;
use floorbook::{compactor, wire};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FLOORBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    floorbook::observability::init(metrics_port)?;

    let port: u16 = env_or("FLOORBOOK_PORT", 5480);
    let bind = std::env::var("FLOORBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("FLOORBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("FLOORBOOK_PASSWORD").unwrap_or_else(|_| "floorbook".into());
    let max_connections: usize = env_or("FLOORBOOK_MAX_CONNECTIONS", 256);
    let compact_threshold: u64 = env_or("FLOORBOOK_COMPACT_THRESHOLD", 1000);
    let floor_plan = std::env::var("FLOORBOOK_FLOOR_PLAN").ok();

    let registry = match &floor_plan {
        Some(path) => TableRegistry::load(std::path::Path::new(path))?,
        None => TableRegistry::default_floor(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let data_dir = PathBuf::from(data_dir);
    let archive = JsonlArchive::open(&data_dir.join("archive.jsonl"))?;
    let engine = Arc::new(Engine::open(
        data_dir.join("floor.wal"),
        Arc::new(registry),
        InMemoryStore::new(),
        archive,
    )?);
    let auth = Arc::new(PasswordAuth::new(password));
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, compact_threshold).await;
    });

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("floorbook listening on {addr}");
    info!("  data_dir: {}", data_dir.display());
    info!("  floor: {} tables", engine.registry().len());
    info!("  floor_plan: {}", floor_plan.as_deref().unwrap_or("built-in"));
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(floorbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(floorbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(floorbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let auth = auth.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, auth).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(floorbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("floorbook stopped");
    Ok(())
}
