mod api;
mod config;
mod dates;
mod db;
mod diff;
mod error;
mod fetch;
mod import;
mod match_key;
mod parse;
mod text;
mod types;
mod workflow;

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{HtmlClient, HtmlFetcher};
use crate::workflow::StandingsWorkflow;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let connect = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(connect).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Fetch layer ---
    let latency = Arc::new(LatencyStats::new());
    let fetcher = Arc::new(HtmlFetcher::new(&cfg, Arc::clone(&latency))?);
    let client = Arc::new(HtmlClient::from_config(&cfg, Arc::clone(&latency))?);
    match &cfg.standings_proxy_url {
        Some(proxy) => info!("Standings pages fetched through proxy at {proxy}"),
        None => info!("Standings pages fetched directly"),
    }

    let workflow = Arc::new(StandingsWorkflow::new(pool.clone(), client, cfg.tab_rate_limit_ms));

    // --- Shutdown ---
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Shutdown requested, cancelling in-flight imports");
        signal_token.cancel();
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        workflow,
        fetcher,
        latency,
        health: Arc::new(HealthState::new(Utc::now().timestamp())),
        shutdown: shutdown.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    pool.close().await;
    info!("Server stopped");
    Ok(())
}
