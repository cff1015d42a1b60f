//! Flaky webhook receiver for exercising the delivery path locally.
//!
//! `POST /` answers 200 most of the time, 500 for roughly one request in ten,
//! and never answers roughly one request in ten so delivery timeouts fire.
//!
//! ```bash
//! STUB_PORT=9090 cargo run -p siren-api --bin webhook-stub
//! WEBHOOK_URL=http://localhost:9090/ cargo run -p siren-api --bin siren-api
//! ```

use std::net::SocketAddr;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use rand::Rng;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webhook_stub=info")),
        )
        .init();

    let port: u16 = std::env::var("STUB_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("STUB_PORT must be a valid u16"))?;

    // Non-POST methods get 405 from the method router
    let app = Router::new().route("/", post(receive));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Webhook stub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn receive(body: String) -> StatusCode {
    let chance = rand::thread_rng().gen_range(0..100);
    match chance {
        0..10 => {
            tracing::info!(body = %body, "Simulating a hung endpoint");
            std::future::pending::<StatusCode>().await
        }
        10..20 => {
            tracing::info!(body = %body, "Responding 500");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => {
            tracing::info!(body = %body, "Responding 200");
            StatusCode::OK
        }
    }
}
