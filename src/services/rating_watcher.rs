use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{
        league_store::{FeedPosition, LeagueStore},
        storage::StorageError,
    },
    services::rating_aggregator::recompute_player_rating,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Recompute player aggregates for every rating change reported by the store.
///
/// Each notification triggers one aggregation; a failed aggregation is logged
/// and the next write for that player repairs it. The position of the last
/// handled change is kept, so a subscription re-established after a feed
/// failure or a degraded period picks up the changes made in between.
pub async fn run(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    let mut delay = INITIAL_DELAY;
    let mut position: Option<FeedPosition> = None;

    loop {
        let store = match state.require_store().await {
            Ok(store) => store,
            Err(_) => {
                if degraded.wait_for(|degraded| !*degraded).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let mut changes = match store.rating_changes(position.clone()).await {
            Ok(changes) => changes,
            Err(err) => {
                warn!(error = %err, "failed to subscribe to rating changes");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };
        info!(resumed = position.is_some(), "subscribed to rating changes");
        delay = INITIAL_DELAY;

        loop {
            tokio::select! {
                change = changes.next() => match change {
                    Some(Ok(change)) => {
                        aggregate(store.as_ref(), &change.player_id).await;
                        position = Some(change.position);
                    }
                    Some(Err(err @ StorageError::Malformed { .. })) => {
                        warn!(error = %err, "ignoring malformed rating change")
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "rating change feed failed; resubscribing");
                        sleep(delay).await;
                        delay = (delay * 2).min(MAX_DELAY);
                        break;
                    }
                    None => {
                        warn!("rating change feed closed; resubscribing");
                        sleep(delay).await;
                        delay = (delay * 2).min(MAX_DELAY);
                        break;
                    }
                },
                changed = degraded.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if state.is_degraded() {
                        warn!("storage degraded; pausing rating watcher");
                        break;
                    }
                }
            }
        }
    }
}

async fn aggregate(store: &dyn LeagueStore, player_id: &str) {
    if let Err(err) = recompute_player_rating(store, player_id).await {
        error!(player_id, error = %err, "rating aggregation failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        config::{AppConfig, RawConfig},
        dao::league_store::memory::MemoryLeagueStore,
        state::AppState,
    };

    #[tokio::test]
    async fn rating_writes_refresh_the_player_aggregate() {
        let store = MemoryLeagueStore::new();
        let config = AppConfig::from_sources(RawConfig::default(), |_| None).unwrap();
        let state = AppState::with_store(config, Arc::new(store.clone()));
        let watcher = tokio::spawn(run(state));

        store.put_rating("p1", "r1", json!(2)).await;
        // Writes made before the watcher subscribed are not replayed, so keep
        // writing until one of them is observed.
        let mut aggregated = None;
        for attempt in 0..100 {
            store.put_rating("p1", "r2", json!(4)).await;
            sleep(Duration::from_millis(10)).await;
            let player = store.player("p1").await;
            if player
                .as_ref()
                .is_some_and(|player| player["numRatings"] == json!(2))
            {
                aggregated = player;
                break;
            }
            assert!(attempt < 99, "watcher never aggregated");
        }

        let player = aggregated.unwrap();
        assert_eq!(player["average"], json!(3.0));
        assert_eq!(player["numRatings"], json!(2));
        watcher.abort();
    }

    #[tokio::test]
    async fn changes_made_while_resubscribing_are_not_lost() {
        let store = MemoryLeagueStore::new();
        let config = AppConfig::from_sources(RawConfig::default(), |_| None).unwrap();
        let state = AppState::with_store(config, Arc::new(store.clone()));
        let watcher = tokio::spawn(run(state));

        for attempt in 0..100 {
            store.put_rating("p1", "r1", json!(2)).await;
            sleep(Duration::from_millis(10)).await;
            if store.player("p1").await.is_some() {
                break;
            }
            assert!(attempt < 99, "watcher never subscribed");
        }

        // The watcher now backs off before resubscribing; this write lands in that gap.
        store.interrupt_rating_changes();
        sleep(Duration::from_millis(100)).await;
        store.put_rating("p2", "r1", json!(5)).await;

        let mut aggregated = None;
        for _ in 0..300 {
            sleep(Duration::from_millis(20)).await;
            aggregated = store.player("p2").await;
            if aggregated.is_some() {
                break;
            }
        }

        let player = aggregated.expect("write made during the gap was never aggregated");
        assert_eq!(player["numRatings"], json!(1));
        assert_eq!(player["average"], json!(5.0));
        watcher.abort();
    }
}
