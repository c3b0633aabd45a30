use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use covers::config::Config;
use covers::observability;
use covers::tenant::TenantManager;
use covers::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    observability::init(&config.bind, config.metrics_port)?;

    let tls_acceptor =
        covers::tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;

    std::fs::create_dir_all(&config.data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
    ));
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("covers listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    let shutdown = shutdown_signal();
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
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
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
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("covers stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
