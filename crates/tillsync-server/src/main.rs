use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tillsync_server::{create_router, AppState, ChangeFeed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let db_path = PathBuf::from(
        std::env::var("TILLSYNC_DB").unwrap_or_else(|_| "tillsync-server.db".to_string()),
    );
    let addr =
        std::env::var("TILLSYNC_ADDR").unwrap_or_else(|_| "0.0.0.0:8686".to_string());

    let feed = ChangeFeed::open(&db_path).await?;
    let state = AppState { feed: Arc::new(feed) };
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("同步服务器已启动: {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
