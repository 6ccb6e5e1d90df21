use serde::Serialize;
use time::{Date, OffsetDateTime, macros::format_description};
use time_tz::OffsetDateTimeExt;
use tracing::{error, info, warn};

use crate::{
    dao::{
        league_store::LeagueStore,
        models::{GameNightClosure, GameNightStatus},
        storage::StorageError,
    },
    error::ServiceError,
    state::AppState,
};

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Calendar day that was inspected, `YYYY-MM-DD`.
    pub date: String,
    /// Live game nights found for that day.
    pub matched: usize,
    /// Game nights moved to not-completed.
    pub closed: u64,
}

/// Calendar day before `now`, in the offset `now` carries.
///
/// Callers convert the run time into the league timezone first, so the
/// result follows that zone's calendar across DST changes.
pub fn yesterday(now: OffsetDateTime) -> Date {
    now.date().previous_day().unwrap_or(Date::MIN)
}

/// `YYYY-MM-DD` representation used by stored game nights.
pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// Close every game night that was still live at the end of yesterday.
///
/// The matched records are transitioned in a single atomic batch, so a
/// failed commit leaves all of them live for the next run to pick up.
/// Running twice on the same day is a no-op the second time because closed
/// records no longer match the live filter.
pub async fn reconcile_live_game_nights(
    store: &dyn LeagueStore,
    now: OffsetDateTime,
    reason: &str,
) -> Result<ReconcileReport, ServiceError> {
    let date = format_date(yesterday(now));
    info!(%date, %now, "checking for game nights left live");

    let live = store
        .find_game_nights(GameNightStatus::Live, date.clone())
        .await
        .inspect_err(|err| error!(%date, error = %err, "failed to query live game nights"))?;

    if live.is_empty() {
        info!(%date, "no live game nights to close");
        return Ok(ReconcileReport {
            date,
            matched: 0,
            closed: 0,
        });
    }

    let matched = live.len();
    let ids: Vec<String> = live.into_iter().map(|game_night| game_night.id).collect();
    info!(%date, matched, ids = ?ids, "closing abandoned live game nights");

    let closed = store
        .close_game_nights(
            ids,
            GameNightClosure {
                reason: reason.to_owned(),
            },
        )
        .await
        .inspect_err(|err: &StorageError| {
            error!(%date, matched, error = %err, "game night batch commit failed; nothing was closed")
        })?;

    if closed < matched as u64 {
        warn!(
            %date,
            matched,
            closed,
            "some game nights left the live state before the batch committed"
        );
    }
    info!(%date, closed, "marked live game nights as not completed");

    Ok(ReconcileReport {
        date,
        matched,
        closed,
    })
}

/// Reconcile against the installed store using the current time in the league timezone.
pub async fn reconcile_now(state: &AppState) -> Result<ReconcileReport, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config();
    let now = OffsetDateTime::now_utc().to_timezone(config.timezone());
    reconcile_live_game_nights(store.as_ref(), now, config.auto_completed_reason()).await
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};
    use time::macros::{date, datetime};

    use super::*;
    use crate::dao::league_store::memory::MemoryLeagueStore;

    const REASON: &str = "closed by test";
    // Run time: 2024-05-02 00:01 in UTC-4.
    const NOW: OffsetDateTime = datetime!(2024-05-02 00:01 -4);

    fn game_night(date: &str, status: u8) -> Map<String, Value> {
        let Value::Object(map) = json!({"date": date, "status": status, "venue": "Hall"}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn yesterday_uses_the_local_calendar() {
        assert_eq!(yesterday(NOW), date!(2024-05-01));
        // 03:30 UTC is still the previous evening in UTC-4.
        let late_evening = datetime!(2024-05-02 03:30 UTC).to_offset(time::macros::offset!(-4));
        assert_eq!(yesterday(late_evening), date!(2024-04-30));
        assert_eq!(yesterday(datetime!(2024-03-01 00:01 UTC)), date!(2024-02-29));
        assert_eq!(yesterday(datetime!(2025-01-01 00:01 UTC)), date!(2024-12-31));
    }

    #[test]
    fn formats_iso_calendar_dates() {
        assert_eq!(format_date(date!(2024-05-01)), "2024-05-01");
        assert_eq!(format_date(date!(2024-12-31)), "2024-12-31");
    }

    #[tokio::test]
    async fn selects_only_yesterdays_live_game_nights() {
        let store = MemoryLeagueStore::new();
        store.put_game_night("yesterday-live", game_night("2024-05-01", 2)).await;
        store.put_game_night("today-live", game_night("2024-05-02", 2)).await;
        store.put_game_night("two-days-live", game_night("2024-04-30", 2)).await;
        store.put_game_night("yesterday-done", game_night("2024-05-01", 3)).await;
        store.put_game_night("yesterday-upcoming", game_night("2024-05-01", 1)).await;

        let report = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                date: "2024-05-01".into(),
                matched: 1,
                closed: 1,
            }
        );
        assert_eq!(store.game_night("yesterday-live").await.unwrap()["status"], json!(4));
        for (id, status) in [
            ("today-live", 2),
            ("two-days-live", 2),
            ("yesterday-done", 3),
            ("yesterday-upcoming", 1),
        ] {
            let record = store.game_night(id).await.unwrap();
            assert_eq!(record["status"], json!(status), "{id}");
            assert!(!record.contains_key("autoCompletedAt"), "{id}");
        }
    }

    #[tokio::test]
    async fn successful_batch_closes_every_match_with_audit_fields() {
        let store = MemoryLeagueStore::new();
        for id in ["a", "b", "c"] {
            store.put_game_night(id, game_night("2024-05-01", 2)).await;
        }

        let report = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();

        assert_eq!(report.closed, 3);
        for id in ["a", "b", "c"] {
            let record = store.game_night(id).await.unwrap();
            assert_eq!(record["status"], json!(4));
            assert_eq!(record["autoCompletedReason"], json!(REASON));
            assert!(record["autoCompletedAt"].is_string());
            assert_eq!(record["venue"], json!("Hall"));
        }
    }

    #[tokio::test]
    async fn failed_batch_leaves_every_match_untouched() {
        let store = MemoryLeagueStore::new();
        for id in ["a", "b", "c"] {
            store.put_game_night(id, game_night("2024-05-01", 2)).await;
        }
        store.fail_next_commit_after(2).await;

        let err = reconcile_live_game_nights(&store, NOW, REASON)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Unavailable(_)));
        for id in ["a", "b", "c"] {
            assert_eq!(
                store.game_night(id).await.unwrap(),
                game_night("2024-05-01", 2)
            );
        }

        // The next run picks them all up.
        let report = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();
        assert_eq!(report.closed, 3);
    }

    #[tokio::test]
    async fn no_matches_is_a_successful_no_op() {
        let store = MemoryLeagueStore::new();
        store.put_game_night("today", game_night("2024-05-02", 2)).await;

        let report = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();

        assert_eq!(report.matched, 0);
        assert_eq!(report.closed, 0);
        assert_eq!(
            store.game_night("today").await.unwrap(),
            game_night("2024-05-02", 2)
        );
    }

    #[tokio::test]
    async fn second_run_on_the_same_day_finds_nothing() {
        let store = MemoryLeagueStore::new();
        for id in ["a", "b"] {
            store.put_game_night(id, game_night("2024-05-01", 2)).await;
        }

        let first = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();
        let closed_record = store.game_night("a").await;
        let second = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();

        assert_eq!(first.closed, 2);
        assert_eq!(second.matched, 0);
        assert_eq!(second.closed, 0);
        assert_eq!(store.game_night("a").await, closed_record);
    }

    #[tokio::test]
    async fn unreadable_records_on_other_days_do_not_block_the_batch() {
        let store = MemoryLeagueStore::new();
        store.put_game_night("old", game_night("2023-01-01", 42)).await;
        store.put_game_night("live", game_night("2024-05-01", 2)).await;
        let Value::Object(float_status) = json!({"date": "2024-05-01", "status": 2.0}) else {
            unreachable!()
        };
        store.put_game_night("float-live", float_status).await;

        let report = reconcile_live_game_nights(&store, NOW, REASON).await.unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.closed, 2);
        for id in ["live", "float-live"] {
            assert_eq!(store.game_night(id).await.unwrap()["status"], json!(4), "{id}");
        }
        assert_eq!(store.game_night("old").await.unwrap()["status"], json!(42));
    }
}
