use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use slotd::tenant::TenantManager;
use slotd::wire;

struct Settings {
    bind: String,
    port: String,
    data_dir: String,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    fn from_env() -> Self {
        Self {
            bind: env_or("SLOTD_BIND", "0.0.0.0".to_string()),
            port: env_or("SLOTD_PORT", "5433".to_string()),
            data_dir: env_or("SLOTD_DATA_DIR", "./data".to_string()),
            password: env_or("SLOTD_PASSWORD", "slotd".to_string()),
            max_connections: env_or("SLOTD_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("SLOTD_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("SLOTD_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            tls_cert: std::env::var("SLOTD_TLS_CERT").ok(),
            tls_key: std::env::var("SLOTD_TLS_KEY").ok(),
        }
    }
}

/// Resolves when the process is asked to stop (SIGTERM or ctrl-c).
async fn stop_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    slotd::observability::init(settings.metrics_port);

    let tls = slotd::tls::acceptor_from_pem(
        settings.tls_cert.as_deref(),
        settings.tls_key.as_deref(),
    )?;
    std::fs::create_dir_all(&settings.data_dir)?;

    let tenants = Arc::new(TenantManager::new(
        PathBuf::from(&settings.data_dir),
        settings.compact_threshold,
    ));
    let conn_permits = Arc::new(Semaphore::new(settings.max_connections));

    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        data_dir = %settings.data_dir,
        max_connections = settings.max_connections,
        tls = tls.is_some(),
        "slotd listening on {addr}"
    );

    let shutdown = stop_signal();
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("stop requested, no longer accepting connections");
                break;
            }
        };

        let Ok(permit) = conn_permits.clone().try_acquire_owned() else {
            warn!("connection limit reached, dropping {peer}");
            metrics::counter!(slotd::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        metrics::counter!(slotd::observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(slotd::observability::CONNECTIONS_ACTIVE).increment(1.0);
        info!("connection from {peer}");

        let tenants = tenants.clone();
        let password = settings.password.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let _permit = permit; // released when the connection closes
            if let Err(e) = wire::process_connection(socket, tenants, password, tls).await {
                error!("connection {peer} ended with error: {e}");
            }
            metrics::gauge!(slotd::observability::CONNECTIONS_ACTIVE).decrement(1.0);
        });
    }

    drain(&conn_permits, settings.max_connections).await;
    info!("slotd stopped");
    Ok(())
}

/// Give in-flight connections up to ten seconds to finish.
async fn drain(permits: &Semaphore, total: usize) {
    info!("draining connections");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while permits.available_permits() < total {
        if tokio::time::Instant::now() >= deadline {
            let open = total - permits.available_permits();
            warn!("drain timed out with {open} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}
