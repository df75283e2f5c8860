use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

mod config;
mod db;
mod error;
mod fetch;
mod geo;
mod routes;
mod store;

use fetch::HttpFetcher;
use geo::{GeoResolver, Provider};
use store::IpStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IpStore>,
    pub resolver: Arc<GeoResolver>,
    pub tera: tera::Tera,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(routes::index::index))
        .route("/save-ip", post(routes::ips::save_ip))
        .route("/view-ips", get(routes::ips::view_ips))
        .route("/test-api", get(routes::diagnostics::test_api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let config = config::AppConfig::from_env().expect("Failed to load config");
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create DB pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let tera = tera::Tera::new("src/templates/**/*.html").expect("Failed to load templates");

    let fetcher: Arc<dyn HttpFetcher> = Arc::new(
        fetch::ReqwestFetcher::new(
            Duration::from_secs(config.geo_timeout_secs),
            &config.geo_user_agent,
        )
        .expect("Failed to create HTTP client"),
    );

    let state = AppState {
        store: Arc::new(store::PgIpStore::new(pool)),
        resolver: Arc::new(GeoResolver::new(Provider::default_chain(), fetcher)),
        tera,
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install signal handler");
    tracing::info!("Shutting down...");
}
