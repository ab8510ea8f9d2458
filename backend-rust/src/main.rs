mod config;
mod crypto;
mod forward;
mod handlers;
mod kalman;
mod permissions;
mod runtime_params;
mod state;
mod tdoa;
mod uwb_hub;
mod zone;

use anyhow::Context;
use tokio::net::UdpSocket;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::{ConfigHandle, DEFAULT_CONFIG_PATH};
use crypto::DecryptionEngine;
use forward::PositionForwarder;
use handlers::AppState;
use runtime_params::RuntimeParams;
use state::StateStore;
use uwb_hub::UwbHub;

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zona_controller=info,tower_http=warn".into()),
        )
        .init();

    info!("📡 Zona controller starting...");

    let config_path = std::env::var("ZONA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = ConfigHandle::load(&config_path).await?;
    let cfg = config.snapshot().await;

    // A missing or malformed key stops us before the ingestion worker exists.
    let key = cfg.cipher_key()?;
    let bits = key.bits();
    let engine = DecryptionEngine::new(key, &cfg.crypto);
    info!("AES-{bits} key loaded, framings: {:?}", engine.variants());

    let store = StateStore::new();
    store.set_buffer_capacity(cfg.tdoa.runtime.buffer.per_anchor_size).await;
    let params = RuntimeParams::new(config.clone());
    let forwarder = PositionForwarder::from_config(&cfg.network).await;

    let udp_addr = cfg.network.udp_addr();
    let socket = UdpSocket::bind(&udp_addr)
        .await
        .with_context(|| format!("could not bind UDP {udp_addr}"))?;
    let hub = UwbHub::new(engine, store.clone(), params, forwarder);
    tokio::spawn(uwb_hub::run(socket, hub));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(AppState { store, config })
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let http_addr = format!("{}:{}", cfg.http.host, cfg.http.port);
    info!("🚀 HTTP query API on {http_addr}");

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("could not bind HTTP {http_addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
