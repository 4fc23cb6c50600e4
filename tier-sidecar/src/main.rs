//! tierd — the tier sidecar binary.
//!
//! Configuration comes from the environment; `STRIPE_API_KEY` is the only
//! required variable. See the library crate for the endpoint surface.

use tier_sidecar::observability::{self, LogFormat};
use tier_sidecar::routes;
use tier_sidecar::state::AppState;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    observability::init(LogFormat::from_env());

    let control = tier_control::Client::from_env()?;
    tracing::info!(
        live = control.stripe.live(),
        key_prefix = control.stripe.key_prefix(),
        "stripe client configured"
    );

    let addr = std::env::var("TIER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    let app = routes::router(AppState::new(control)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "tierd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
