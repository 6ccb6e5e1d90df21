use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};

use crate::{
    dto::jobs::{PlayerAggregateResponse, ReconcileResponse},
    error::AppError,
    services::{game_night_reconciler, rating_aggregator},
    state::SharedState,
};

/// Routes letting external schedulers and change notifiers trigger the jobs.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/jobs/reconcile-live-game-nights",
            post(reconcile_live_game_nights),
        )
        .route(
            "/players/{player_id}/rating-aggregate",
            post(aggregate_player_rating),
        )
}

/// Close yesterday's game nights that are still live.
#[utoipa::path(
    post,
    path = "/jobs/reconcile-live-game-nights",
    tag = "jobs",
    responses(
        (status = 200, description = "Reconciliation finished", body = ReconcileResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn reconcile_live_game_nights(
    State(state): State<SharedState>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let report = game_night_reconciler::reconcile_now(&state).await?;
    Ok(Json(report.into()))
}

/// Recompute and persist a player's rating aggregate.
#[utoipa::path(
    post,
    path = "/players/{player_id}/rating-aggregate",
    tag = "jobs",
    params(("player_id" = String, Path, description = "Player whose ratings changed")),
    responses(
        (status = 200, description = "Aggregate updated", body = PlayerAggregateResponse),
        (status = 400, description = "Invalid player id"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn aggregate_player_rating(
    State(state): State<SharedState>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerAggregateResponse>, AppError> {
    let store = state.require_store().await?;
    let aggregate = rating_aggregator::recompute_player_rating(store.as_ref(), &player_id).await?;
    Ok(Json(PlayerAggregateResponse::new(player_id, aggregate)))
}
