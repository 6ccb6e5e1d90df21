use std::time::Duration;

use time::{OffsetDateTime, PrimitiveDateTime, Time};
use time_tz::{OffsetDateTimeExt, PrimitiveDateTimeExt, TimeZone};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{error::ServiceError, services::game_night_reconciler, state::SharedState};

/// First instant strictly after `now` whose wall-clock time in `zone` is `at`.
///
/// When `at` falls into a DST gap on some day the run moves one hour later;
/// when it is ambiguous the earlier instant wins.
pub fn next_run_after<T: TimeZone>(now: OffsetDateTime, zone: &T, at: Time) -> OffsetDateTime {
    let mut day = now.to_timezone(zone).date();
    loop {
        let local = PrimitiveDateTime::new(day, at);
        let candidate = local
            .assume_timezone(zone)
            .take_first()
            .or_else(|| (local + time::Duration::HOUR).assume_timezone(zone).take_first());

        if let Some(candidate) = candidate.filter(|candidate| *candidate > now) {
            return candidate;
        }
        match day.next_day() {
            Some(next) => day = next,
            None => return now,
        }
    }
}

/// Run the reconciler once a day at the configured local time, forever.
///
/// A failed run is logged and left for the next day; the timer never retries
/// on its own.
pub async fn run_daily(state: SharedState) {
    let zone = state.config().timezone();
    let at = state.config().run_at();

    loop {
        let now = OffsetDateTime::now_utc();
        let next = next_run_after(now, zone, at);
        info!(
            next_run = %next.to_timezone(zone),
            timezone = state.config().timezone_name(),
            "scheduled game night reconciliation"
        );
        sleep(Duration::try_from(next - now).unwrap_or(Duration::ZERO)).await;

        match game_night_reconciler::reconcile_now(&state).await {
            Ok(report) => info!(
                date = %report.date,
                matched = report.matched,
                closed = report.closed,
                "scheduled reconciliation finished"
            ),
            Err(ServiceError::Degraded) => {
                warn!("storage unavailable (degraded mode); skipping scheduled reconciliation")
            }
            Err(err) => error!(error = %err, "scheduled reconciliation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{datetime, time};
    use time_tz::{Tz, timezones};

    use super::*;
    use crate::services::game_night_reconciler::yesterday;

    fn new_york() -> &'static Tz {
        timezones::get_by_name("America/New_York").unwrap()
    }

    #[test]
    fn next_run_is_the_coming_local_run_time() {
        let zone = new_york();
        assert_eq!(
            next_run_after(datetime!(2024-05-01 12:00 UTC), zone, time!(00:01)),
            datetime!(2024-05-02 04:01 UTC)
        );
        assert_eq!(
            next_run_after(datetime!(2024-05-02 04:00 UTC), zone, time!(00:01)),
            datetime!(2024-05-02 04:01 UTC)
        );
    }

    #[test]
    fn next_run_is_strictly_after_now() {
        assert_eq!(
            next_run_after(datetime!(2024-05-02 04:01 UTC), new_york(), time!(00:01)),
            datetime!(2024-05-03 04:01 UTC)
        );
    }

    #[test]
    fn next_run_follows_daylight_saving_changes() {
        let zone = new_york();
        // Clocks spring forward at 02:00 on 2024-03-10.
        let first = next_run_after(datetime!(2024-03-09 17:00 UTC), zone, time!(00:01));
        assert_eq!(first, datetime!(2024-03-10 05:01 UTC));
        assert_eq!(
            next_run_after(first, zone, time!(00:01)),
            datetime!(2024-03-11 04:01 UTC)
        );

        // Clocks fall back at 02:00 on 2024-11-03.
        let first = next_run_after(datetime!(2024-11-02 17:00 UTC), zone, time!(00:01));
        assert_eq!(first, datetime!(2024-11-03 04:01 UTC));
        assert_eq!(
            next_run_after(first, zone, time!(00:01)),
            datetime!(2024-11-04 05:01 UTC)
        );
    }

    #[test]
    fn yesterday_is_taken_from_the_zone_calendar_on_dst_days() {
        let zone = new_york();
        let run = datetime!(2024-03-10 05:01 UTC).to_timezone(zone);
        assert_eq!(yesterday(run), time::macros::date!(2024-03-09));

        let run = datetime!(2024-11-04 05:01 UTC).to_timezone(zone);
        assert_eq!(yesterday(run), time::macros::date!(2024-11-03));

        // One minute before local midnight is still the previous day.
        let late = datetime!(2024-03-10 04:59 UTC).to_timezone(zone);
        assert_eq!(yesterday(late), time::macros::date!(2024-03-08));
    }
}
