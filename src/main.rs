//! League jobs binary: serves the trigger API and timers, or runs a single job and exits.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use league_jobs::{
    config::AppConfig,
    dao::league_store,
    routes,
    services::{
        game_night_reconciler, rating_aggregator, rating_watcher, scheduler, storage_supervisor,
    },
    state::{AppState, SharedState},
};

#[derive(Debug, Parser)]
#[command(name = "league-jobs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP trigger API, the daily reconciliation timer and the rating watcher (default).
    Serve,
    /// Close yesterday's game nights that are still live, then exit.
    Reconcile,
    /// Recompute one player's rating aggregate, then exit.
    Aggregate {
        /// Player whose ratings should be aggregated.
        player_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Reconcile => reconcile_once(config).await,
        Command::Aggregate { player_id } => aggregate_once(config, &player_id).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let port = config.port();
    let settings = config.store().clone();
    let app_state = AppState::new(config);

    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        let settings = settings.clone();
        async move { league_store::connect(&settings).await }
    }));
    tokio::spawn(scheduler::run_daily(app_state.clone()));
    tokio::spawn(rating_watcher::run(app_state.clone()));

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// One-off reconciliation for operators; the exit status reports the outcome.
async fn reconcile_once(config: AppConfig) -> anyhow::Result<()> {
    let store = league_store::connect(config.store())
        .await
        .context("connecting to storage")?;
    let state = AppState::with_store(config, store);

    let report = game_night_reconciler::reconcile_now(&state)
        .await
        .inspect_err(|err| error!(error = %err, "reconciliation failed"))
        .context("reconciling live game nights")?;

    info!(
        date = %report.date,
        matched = report.matched,
        closed = report.closed,
        "reconciliation finished"
    );
    Ok(())
}

async fn aggregate_once(config: AppConfig, player_id: &str) -> anyhow::Result<()> {
    let store = league_store::connect(config.store())
        .await
        .context("connecting to storage")?;

    let aggregate = rating_aggregator::recompute_player_rating(store.as_ref(), player_id)
        .await
        .inspect_err(|err| error!(player_id, error = %err, "rating aggregation failed"))
        .with_context(|| format!("aggregating ratings of player `{player_id}`"))?;

    info!(
        player_id,
        average = aggregate.average,
        num_ratings = aggregate.num_ratings,
        "rating aggregation finished"
    );
    Ok(())
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
