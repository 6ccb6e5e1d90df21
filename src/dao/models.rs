use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Value carried by a single rating document.
///
/// Ratings are written by end users through the web client, so the stored
/// value is not guaranteed to be a number. Only [`RatingValue::Numeric`]
/// entries take part in aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatingValue {
    /// Finite numeric score.
    Numeric(f64),
    /// A value is present but is not a usable number (string, bool, NaN, ...).
    NonNumeric,
    /// The document has no value field, or it is null.
    Missing,
}

impl RatingValue {
    /// Classify a raw float, rejecting NaN and infinities.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            RatingValue::Numeric(value)
        } else {
            RatingValue::NonNumeric
        }
    }

    /// Score to aggregate, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RatingValue::Numeric(value) => Some(*value),
            RatingValue::NonNumeric | RatingValue::Missing => None,
        }
    }
}

impl From<&Value> for RatingValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RatingValue::Missing,
            Value::Number(number) => number
                .as_f64()
                .map(RatingValue::from_f64)
                .unwrap_or(RatingValue::NonNumeric),
            _ => RatingValue::NonNumeric,
        }
    }
}

impl From<Option<&Value>> for RatingValue {
    fn from(value: Option<&Value>) -> Self {
        value.map(Into::into).unwrap_or(RatingValue::Missing)
    }
}

/// A single rater's score for a single player.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingEntity {
    /// Player being rated.
    pub player_id: String,
    /// User who submitted the rating.
    pub rater_id: String,
    /// Submitted value.
    pub value: RatingValue,
}

/// Derived rating summary merged into the player record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAggregate {
    /// Mean of all numeric ratings, `0` when there are none.
    pub average: f64,
    /// Number of numeric ratings included in the average.
    pub num_ratings: u64,
}

/// Lifecycle status of a game night, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GameNightStatus {
    /// Being prepared by an organiser.
    Draft,
    /// Published and waiting for its date.
    Upcoming,
    /// Currently being played.
    Live,
    /// Finished normally.
    Completed,
    /// Closed without finishing (forced by reconciliation).
    NotCompleted,
}

/// Raised when a stored status code is outside the known range.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown game night status code {0}")]
pub struct UnknownStatus(pub u8);

impl GameNightStatus {
    /// Integer code used in stored documents.
    pub fn code(self) -> u8 {
        match self {
            GameNightStatus::Draft => 0,
            GameNightStatus::Upcoming => 1,
            GameNightStatus::Live => 2,
            GameNightStatus::Completed => 3,
            GameNightStatus::NotCompleted => 4,
        }
    }
}

impl TryFrom<u8> for GameNightStatus {
    type Error = UnknownStatus;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(GameNightStatus::Draft),
            1 => Ok(GameNightStatus::Upcoming),
            2 => Ok(GameNightStatus::Live),
            3 => Ok(GameNightStatus::Completed),
            4 => Ok(GameNightStatus::NotCompleted),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl From<GameNightStatus> for u8 {
    fn from(status: GameNightStatus) -> Self {
        status.code()
    }
}

/// The slice of a game night document the reconciler cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameNightEntity {
    /// Document identifier.
    pub id: String,
    /// Calendar day of the event, `YYYY-MM-DD`.
    pub date: String,
    /// Current lifecycle status.
    pub status: GameNightStatus,
}

/// Audit payload written when a live game night is force-closed.
///
/// The completion timestamp is not part of the payload: backends assign it
/// from their own clock when the batch commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameNightClosure {
    /// Fixed human readable reason stored as `autoCompletedReason`.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_json_rating_values() {
        assert_eq!(RatingValue::from(&json!(3)), RatingValue::Numeric(3.0));
        assert_eq!(RatingValue::from(&json!(4.5)), RatingValue::Numeric(4.5));
        assert_eq!(RatingValue::from(&json!("x")), RatingValue::NonNumeric);
        assert_eq!(RatingValue::from(&json!(true)), RatingValue::NonNumeric);
        assert_eq!(RatingValue::from(&json!(null)), RatingValue::Missing);
        assert_eq!(RatingValue::from(None::<&Value>), RatingValue::Missing);
    }

    #[test]
    fn non_finite_floats_are_not_numeric() {
        assert_eq!(RatingValue::from_f64(f64::NAN), RatingValue::NonNumeric);
        assert_eq!(RatingValue::from_f64(f64::INFINITY), RatingValue::NonNumeric);
        assert_eq!(RatingValue::from_f64(2.0).as_number(), Some(2.0));
    }

    #[test]
    fn status_uses_integer_codes() {
        assert_eq!(serde_json::to_value(GameNightStatus::NotCompleted).unwrap(), json!(4));
        assert_eq!(
            serde_json::from_value::<GameNightStatus>(json!(2)).unwrap(),
            GameNightStatus::Live
        );
        assert!(serde_json::from_value::<GameNightStatus>(json!(9)).is_err());
    }

    #[test]
    fn aggregate_serializes_with_stored_field_names() {
        let aggregate = PlayerAggregate {
            average: 4.0,
            num_ratings: 3,
        };
        assert_eq!(
            serde_json::to_value(aggregate).unwrap(),
            json!({"average": 4.0, "numRatings": 3})
        );
    }
}
