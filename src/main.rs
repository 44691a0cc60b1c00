use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;

use roast_arena_backend::api::{self, AppState};
use roast_arena_backend::config::Config;
use roast_arena_backend::db::Database;
use roast_arena_backend::metrics;
use roast_arena_backend::oracle::HttpOracle;
use roast_arena_backend::rate_limit::RateLimiter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    tracing::info!(?config, "Starting roast arena backend");

    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let state = AppState {
        db: db.clone(),
        oracle: Arc::new(HttpOracle::new(&config.oracle_url)),
        rate_limiter: RateLimiter::new(),
        total_rounds: config.total_rounds,
        stream_turn_delay: Duration::from_millis(config.stream_turn_delay_ms),
    };

    // Inject the database and rate limiter into request extensions so the
    // fighter auth extractor can reach them without threading AppState.
    let db_for_ext = db.clone();
    let limiter_for_ext = state.rate_limiter.clone();

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            move |mut req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| {
                let db = db_for_ext.clone();
                let limiter = limiter_for_ext.clone();
                async move {
                    req.extensions_mut().insert(db);
                    req.extensions_mut().insert(limiter);
                    next.run(req).await
                }
            },
        ));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Roast arena backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
