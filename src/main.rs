use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cat_arena_server::config::ServerConfig;
use cat_arena_server::game::rotation::{IntervalTicker, MapPool, MapRotation};
use cat_arena_server::game::state::SessionStore;
use cat_arena_server::metrics::{self, Metrics};
use cat_arena_server::net::connection::ConnectionRegistry;
use cat_arena_server::net::game_session::{start_idle_reaper, GameSession};
use cat_arena_server::net::hub::RoomHub;
use cat_arena_server::net::transport::WebTransportServer;
use cat_arena_server::storage::MapRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Cat Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;
    info!(
        "Configuration loaded: {}, admin port {}, rotation every {:?}",
        config.socket_addr(),
        config.admin_port,
        config.rotation_interval
    );

    // The rotation pool is read once; without maps there is nothing to serve
    let repo = MapRepository::connect(&config.database_url)
        .await
        .context("Failed to open map database")?;
    let maps = repo
        .load_pool()
        .await
        .context("Failed to load the map pool")?;
    info!("Loaded {} maps", maps.len());

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(SessionStore::new());
    let hub = Arc::new(RoomHub::new(config.max_rooms));
    let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
    let session = Arc::new(GameSession::new(
        store.clone(),
        hub.clone(),
        registry,
        metrics.clone(),
    ));

    // Cycle zero runs here; a pool whose first map is unusable is fatal
    let rotation = MapRotation::new(MapPool::new(maps), store, hub, metrics.clone())
        .start(IntervalTicker::new(config.rotation_interval))
        .context("Map rotation could not start")?;
    let reaper = start_idle_reaper(session.clone(), config.idle_timeout, config.reap_interval);

    let admin_metrics = metrics.clone();
    let admin_port = config.admin_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_admin_server(admin_metrics, repo, admin_port).await {
            error!("Admin server error: {}", e);
        }
    });

    let server = WebTransportServer::new(config.clone(), session).await?;

    info!("Server ready on https://{}", config.socket_addr());
    info!(
        "Chrome flag: --ignore-certificate-errors-spki-list={}",
        server.cert_hash()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    rotation.stop().await;
    reaper.abort();
    info!("Server stopped");

    Ok(())
}
