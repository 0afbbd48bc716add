mod config;
mod dirs;
mod error;
mod handlers;
mod hooks;
mod manager;
mod monitor;
mod portmap;
mod state;
mod task;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dirs::DirManager;
use crate::hooks::HookRunner;
use crate::manager::{events::LoggingListener, TaskManager};
use crate::portmap::{PortMapper, PortMapperManager, Protocol, StaticPortMapper};
use crate::state::{AppState, NodeInfo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    // mapeo de puertos: si no hay reglas se anuncia el puerto local
    let mappers: Vec<Box<dyn PortMapper>> = vec![Box::new(StaticPortMapper::new(
        &config.port_mappings,
        &config.advertised_address,
        config.external_address.clone(),
    ))];
    let mut ports = PortMapperManager::new(mappers);
    let local_port = config.bind_addr.port();
    if ports.discover().is_some() {
        ports.create_mapping(local_port, None, Protocol::Tcp, None);
    }
    let port = ports.external_port(local_port);
    let address = config
        .external_address
        .clone()
        .unwrap_or_else(|| config.advertised_address.clone());

    let dirs = DirManager::new(config.data_root.clone(), &config.node_id);
    let hooks = HookRunner::new(config.hook_timeout, config.hook_workers);
    let mut manager = TaskManager::new(&config.node_id, &address, port, dirs, hooks);
    manager.register_listener(Arc::new(LoggingListener));
    let manager = manager.into_shared();

    // barrido de TTL en segundo plano
    tokio::spawn(monitor::sweep_expired(manager.clone(), config.sweep_interval));

    let node = NodeInfo {
        node_id: config.node_id.clone(),
        address,
        port,
        network: ports.network(),
    };
    let app = handlers::build_router(AppState {
        manager,
        node: Arc::new(node),
    });

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        "master {} escuchando en {} (anunciado como {}:{})",
        config.node_id,
        listener.local_addr()?,
        config.external_address.as_deref().unwrap_or(&config.advertised_address),
        port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ports.quit();
    info!("master detenido");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("no se pudo escuchar Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("apagando master");
}
