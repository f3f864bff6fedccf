//! Mixtape Party backend entrypoint wiring the REST API, session storage and media providers.

use std::{env, future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixtape_party_back::{
    config::AppConfig,
    dao::{game_store::GameStore, game_store::memory::MemoryGameStore, storage::StorageError},
    providers::{itunes::ItunesClient, youtube::YoutubeClient},
    routes,
    services::{cache_maintenance, storage_supervisor},
    state::{AppState, Providers, SharedState},
};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let timeout = config.media().provider_timeout;
    let providers = Providers {
        video: Arc::new(
            YoutubeClient::new(env::var("YOUTUBE_API_KEY").ok(), timeout)
                .context("building video search client")?,
        ),
        tracks: Arc::new(ItunesClient::new(timeout).context("building track search client")?),
    };
    let sweep_interval = config.media().sweep_interval;

    let app_state = AppState::new(config, providers, env::var("MAINTENANCE_TOKEN").ok());
    if app_state.maintenance_token().is_none() {
        warn!("MAINTENANCE_TOKEN not set; cache maintenance endpoints are disabled");
    }

    let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| default_backend().into());
    info!(%backend, "selected storage backend");
    let connect = store_connector(&backend).context("configuring storage backend")?;
    tokio::spawn(storage_supervisor::run(app_state.clone(), connect));

    if let Some(period) = sweep_interval {
        tokio::spawn(cache_maintenance::run(app_state.clone(), period));
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

fn default_backend() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    }
}

/// Connection factory handed to the storage supervisor for the selected backend.
fn store_connector(backend: &str) -> anyhow::Result<impl FnMut() -> ConnectFuture + Send + 'static> {
    let connect: Box<dyn FnMut() -> ConnectFuture + Send> = match backend {
        "memory" => {
            let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
            Box::new(move || -> ConnectFuture {
                let store = store.clone();
                Box::pin(async move { Ok(store) })
            })
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use mixtape_party_back::dao::game_store::mongodb::{MongoConfig, MongoGameStore};

            Box::new(move || -> ConnectFuture {
                Box::pin(async move {
                    let config = MongoConfig::from_env().await?;
                    let store = MongoGameStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn GameStore>)
                })
            })
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use mixtape_party_back::dao::game_store::couchdb::{CouchConfig, CouchGameStore};

            let config = CouchConfig::from_env().context("reading CouchDB settings")?;
            Box::new(move || -> ConnectFuture {
                let config = config.clone();
                Box::pin(async move {
                    let store = CouchGameStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn GameStore>)
                })
            })
        }
        other => anyhow::bail!("unsupported STORAGE_BACKEND `{other}`"),
    };
    Ok(connect)
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
