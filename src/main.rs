use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use esam_conditioner::config::Settings;
use esam_conditioner::esam::{build_notification, parse_signal_event};
use esam_conditioner::store::ChannelStore;
use esam_conditioner::{MemoryLockStore, Resolver, SystemClock};

struct AppState {
    channels: ChannelStore,
    resolver: Resolver,
}

#[derive(Deserialize)]
struct EsamQuery {
    channel: Option<String>,
}

/// Creates the directory a file-backed SQLite URL points into.
fn ensure_sqlite_parent(db_url: &str) -> std::io::Result<()> {
    if db_url.contains(":memory:") {
        return Ok(());
    }
    let Some(path) = db_url.strip_prefix("sqlite://").or_else(|| db_url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("esam_conditioner=info".parse()?),
        )
        .init();

    let settings = Settings::from_env()?;
    if let Err(e) = ensure_sqlite_parent(&settings.db_url) {
        error!("could not create database directory for {}: {e}", settings.db_url);
    }

    let conn_opts = SqliteConnectOptions::from_str(&settings.db_url)?.create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(conn_opts)
        .await?;
    sqlx::migrate!().run(&db).await?;

    let channels = ChannelStore::new(db);
    if let Some(path) = &settings.channels_file {
        channels.seed_from_file(path).await?;
    }

    let resolver = Resolver::new(Arc::new(MemoryLockStore::new()), Arc::new(SystemClock), settings.lock_write);
    let state = Arc::new(AppState { channels, resolver });

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/esam", post(handle_esam))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", settings.port).parse()?;
    info!("POIS listening on http://{addr} (lock write: {:?})", settings.lock_write);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_esam(
    State(st): State<Arc<AppState>>,
    Query(q): Query<EsamQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let event = match parse_signal_event(&body) {
        Ok(ev) => ev,
        Err(e) => {
            error!("ESAM parse error: {e}");
            return (StatusCode::BAD_REQUEST, "invalid ESAM payload").into_response();
        }
    };

    // Resolve channel via query/header, fallback to "default"
    let channel = q
        .channel
        .or_else(|| headers.get("X-POIS-Channel").and_then(|v| v.to_str().ok()).map(str::to_string))
        .unwrap_or_else(|| "default".to_string());

    let raw = event.cue_bytes();
    let lookup = st.channels.channel_config(&channel).await;
    let disposition = st.resolver.resolve(&channel, &raw, lookup);

    let xml = build_notification(&event, &disposition);
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}
