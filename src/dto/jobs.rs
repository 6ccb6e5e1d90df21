use serde::Serialize;
use utoipa::ToSchema;

use crate::{dao::models::PlayerAggregate, services::game_night_reconciler::ReconcileReport};

/// Result of a triggered reconciliation run.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReconcileResponse {
    /// Calendar day that was inspected (`YYYY-MM-DD`).
    pub date: String,
    /// Live game nights found for that day.
    pub matched: usize,
    /// Game nights moved to not-completed.
    pub closed: u64,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            date: report.date,
            matched: report.matched,
            closed: report.closed,
        }
    }
}

/// Freshly recomputed rating aggregate of a player.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAggregateResponse {
    /// Player whose ratings were aggregated.
    pub player_id: String,
    /// Mean of the numeric ratings, `0` when there are none.
    pub average: f64,
    /// Number of numeric ratings.
    pub num_ratings: u64,
}

impl PlayerAggregateResponse {
    /// Pair an aggregate with its player.
    pub fn new(player_id: String, aggregate: PlayerAggregate) -> Self {
        Self {
            player_id,
            average: aggregate.average,
            num_ratings: aggregate.num_ratings,
        }
    }
}
