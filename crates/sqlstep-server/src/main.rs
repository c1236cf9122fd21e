//! SQLStep HTTP server
//!
//! Replays SQL statements as a sequence of visual steps against an embedded
//! DuckDB loaded with a sample dataset.

use anyhow::Context;
use sqlstep_duck::{Dataset, DuckEngine};
use tracing::info;

mod config;
mod logging;
mod routes;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load_or_default("config.yaml").context("loading config.yaml")?;
    config.apply_logging_env();
    logging::init()?;

    let dataset: Dataset = config.dataset.name.parse()?;
    let engine = match &config.dataset.database {
        Some(path) => DuckEngine::open(path).with_context(|| format!("opening database {}", path))?,
        None => DuckEngine::new()?,
    };
    engine
        .load_dataset(dataset)
        .with_context(|| format!("loading dataset {}", dataset))?;
    info!(
        dataset = %dataset,
        database = config.dataset.database.as_deref().unwrap_or(":memory:"),
        "Sample dataset loaded"
    );

    let app = routes::router(routes::AppState::new(engine, dataset));
    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;

    info!("SQLStep server listening on {}", address);
    axum::serve(listener, app).await?;

    Ok(())
}
