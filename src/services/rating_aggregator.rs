use tracing::{debug, info};

use crate::{
    dao::{
        league_store::LeagueStore,
        models::{PlayerAggregate, RatingEntity},
    },
    error::ServiceError,
};

/// Average and count of every numeric rating in `ratings`.
///
/// Non-numeric and missing values are skipped. With no numeric rating the
/// average is `0` rather than a division by zero.
pub fn summarize(ratings: &[RatingEntity]) -> PlayerAggregate {
    let (sum, count) = ratings
        .iter()
        .filter_map(|rating| rating.value.as_number())
        .fold((0.0_f64, 0_u64), |(sum, count), value| (sum + value, count + 1));

    let average = if count > 0 { sum / count as f64 } else { 0.0 };
    PlayerAggregate {
        average,
        num_ratings: count,
    }
}

/// Recompute a player's aggregate from their complete current rating set and merge it.
///
/// Every call reads the full rating set instead of applying a delta, so
/// duplicate or reordered trigger deliveries converge on the same result.
pub async fn recompute_player_rating(
    store: &dyn LeagueStore,
    player_id: &str,
) -> Result<PlayerAggregate, ServiceError> {
    if player_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput("player id must not be empty".into()));
    }

    let ratings = store.ratings_for_player(player_id.to_owned()).await?;
    let aggregate = summarize(&ratings);
    debug!(
        player_id,
        fetched = ratings.len(),
        counted = aggregate.num_ratings,
        "summarized player ratings"
    );

    store
        .merge_player_aggregate(player_id.to_owned(), aggregate)
        .await?;

    info!(
        player_id,
        average = aggregate.average,
        num_ratings = aggregate.num_ratings,
        "updated player rating aggregate"
    );
    Ok(aggregate)
}
