use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studio_booking::{config::Config, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Studio Booking API");

    let app_state = AppState::new(config.clone())
        .await
        .expect("Failed to initialize application state");

    // --- Start background tasks ---

    // One loop drives both recurring jobs: reclaim expired reservations,
    // then flip due occurrences to in_progress and promote their queues.
    // Both are re-entrant, so an overlapping run after a redeploy is fine.
    let jobs_state = app_state.clone();
    let interval = Duration::from_secs(config.booking.job_interval_seconds);
    task::spawn(async move {
        loop {
            if let Err(e) = jobs_state.sweeper.sweep_expired().await {
                error!("expiration sweep failed: {}", e);
            }
            if let Err(e) = jobs_state.promoter.start_due_occurrences().await {
                error!("occurrence start pass failed: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    });

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Studio Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", studio_booking::controllers::routes())
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}
