use mongodb::{
    bson::{Bson, Document, oid::ObjectId},
    change_stream::event::{ChangeStreamEvent, OperationType},
};
use serde::{Deserialize, Serialize};

use crate::dao::{
    models::{GameNightEntity, GameNightStatus, RatingEntity, RatingValue},
    storage::{StorageError, StorageResult},
};

/// Compound `_id` of a rating: one document per (player, rater) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingKey {
    pub player_id: String,
    pub rater_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoRatingDocument {
    #[serde(rename = "_id")]
    key: RatingKey,
    #[serde(default)]
    value: Option<Bson>,
}

impl From<MongoRatingDocument> for RatingEntity {
    fn from(document: MongoRatingDocument) -> Self {
        Self {
            player_id: document.key.player_id,
            rater_id: document.key.rater_id,
            value: rating_value(document.value.as_ref()),
        }
    }
}

fn rating_value(value: Option<&Bson>) -> RatingValue {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => RatingValue::Missing,
        Some(Bson::Double(value)) => RatingValue::from_f64(*value),
        Some(Bson::Int32(value)) => RatingValue::Numeric(f64::from(*value)),
        Some(Bson::Int64(value)) => RatingValue::from_f64(*value as f64),
        Some(Bson::Decimal128(value)) => value
            .to_string()
            .parse::<f64>()
            .map(RatingValue::from_f64)
            .unwrap_or(RatingValue::NonNumeric),
        Some(_) => RatingValue::NonNumeric,
    }
}

/// Game night fields read by the reconciler; everything else stays in the database.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoGameNightDocument {
    #[serde(rename = "_id")]
    id: Bson,
    date: String,
    status: Bson,
}

/// String form of a document `_id`, as exposed on [`GameNightEntity::id`].
pub fn id_key(id: &Bson) -> String {
    match id {
        Bson::String(id) => id.clone(),
        Bson::ObjectId(id) => id.to_hex(),
        Bson::Int32(id) => id.to_string(),
        Bson::Int64(id) => id.to_string(),
        other => other.to_string(),
    }
}

/// `_id` values whose [`id_key`] is one of `ids`, for use in an `$in` filter.
pub fn id_candidates(ids: &[String]) -> Vec<Bson> {
    let mut candidates = Vec::with_capacity(ids.len());
    for id in ids {
        candidates.push(Bson::String(id.clone()));
        if let Ok(id) = ObjectId::parse_str(id) {
            candidates.push(Bson::ObjectId(id));
        }
        if let Ok(id) = id.parse::<i64>() {
            candidates.push(Bson::Int64(id));
        }
    }
    candidates
}

impl TryFrom<MongoGameNightDocument> for GameNightEntity {
    type Error = StorageError;

    fn try_from(document: MongoGameNightDocument) -> StorageResult<Self> {
        let id = id_key(&document.id);
        // Web clients write numbers as doubles, so accept any integral number.
        let code = match document.status {
            Bson::Int32(code) => u8::try_from(code).ok(),
            Bson::Int64(code) => u8::try_from(code).ok(),
            Bson::Double(code) if code.fract() == 0.0 && (0.0..=255.0).contains(&code) => {
                Some(code as u8)
            }
            _ => None,
        };
        let status = code
            .and_then(|code| GameNightStatus::try_from(code).ok())
            .ok_or_else(|| {
                StorageError::malformed(format!(
                    "game night `{id}` has status {}",
                    document.status
                ))
            })?;

        Ok(Self {
            id,
            date: document.date,
            status,
        })
    }
}

/// Player whose ratings a change stream event touched, if the event is relevant.
pub fn changed_player(event: &ChangeStreamEvent<Document>) -> Option<StorageResult<String>> {
    match event.operation_type {
        OperationType::Insert
        | OperationType::Update
        | OperationType::Replace
        | OperationType::Delete => {}
        _ => return None,
    }

    let player_id = event
        .document_key
        .as_ref()
        .and_then(|key| key.get_document("_id").ok())
        .and_then(|id| id.get_str("player_id").ok());

    Some(match player_id {
        Some(player_id) => Ok(player_id.to_owned()),
        None => Err(StorageError::malformed(format!(
            "rating change event without player id: {:?}",
            event.document_key
        ))),
    })
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{Decimal128, doc};

    fn change_event(
        operation: &str,
        document_key: Option<Document>,
    ) -> ChangeStreamEvent<Document> {
        let mut event = doc! {
            "_id": { "_data": "826655A1B2000000012B0229296E04" },
            "operationType": operation,
            "ns": { "db": "league", "coll": "ratings" },
        };
        if let Some(document_key) = document_key {
            event.insert("documentKey", document_key);
        }
        mongodb::bson::deserialize_from_document(event).unwrap()
    }

    fn rating_key(player_id: &str) -> Document {
        doc! { "_id": { "player_id": player_id, "rater_id": "r1" } }
    }

    use super::*;

    #[test]
    fn classifies_bson_rating_values() {
        assert_eq!(rating_value(Some(&Bson::Int32(3))), RatingValue::Numeric(3.0));
        assert_eq!(rating_value(Some(&Bson::Int64(5))), RatingValue::Numeric(5.0));
        assert_eq!(rating_value(Some(&Bson::Double(4.5))), RatingValue::Numeric(4.5));
        assert_eq!(
            rating_value(Some(&Bson::String("x".into()))),
            RatingValue::NonNumeric
        );
        assert_eq!(rating_value(Some(&Bson::Null)), RatingValue::Missing);
        assert_eq!(rating_value(None), RatingValue::Missing);
        let decimal: Decimal128 = "2.5".parse().unwrap();
        assert_eq!(
            rating_value(Some(&Bson::Decimal128(decimal))),
            RatingValue::Numeric(2.5)
        );
    }

    #[test]
    fn reads_rating_document_with_missing_value() {
        let document: MongoRatingDocument = mongodb::bson::deserialize_from_document(
            doc! { "_id": { "player_id": "p1", "rater_id": "r1" } },
        )
        .unwrap();
        let entity = RatingEntity::from(document);
        assert_eq!(entity.player_id, "p1");
        assert_eq!(entity.value, RatingValue::Missing);
    }

    #[test]
    fn accepts_double_status_codes() {
        let document: MongoGameNightDocument = mongodb::bson::deserialize_from_document(
            doc! { "_id": "g1", "date": "2024-05-01", "status": 2.0, "venue": "Hall" },
        )
        .unwrap();
        let entity = GameNightEntity::try_from(document).unwrap();
        assert_eq!(entity.status, GameNightStatus::Live);
    }

    #[test]
    fn rejects_unknown_status_codes() {
        let document: MongoGameNightDocument = mongodb::bson::deserialize_from_document(
            doc! { "_id": "g1", "date": "2024-05-01", "status": 7 },
        )
        .unwrap();
        assert!(GameNightEntity::try_from(document).is_err());
    }

    #[test]
    fn accepts_object_id_keys() {
        let id = ObjectId::parse_str("665f1c2b9d3e4a0012345678").unwrap();
        let document: MongoGameNightDocument = mongodb::bson::deserialize_from_document(
            doc! { "_id": id, "date": "2024-05-01", "status": 2 },
        )
        .unwrap();
        let entity = GameNightEntity::try_from(document).unwrap();

        assert_eq!(entity.id, "665f1c2b9d3e4a0012345678");
        assert!(id_candidates(&[entity.id]).contains(&Bson::ObjectId(id)));
    }

    #[test]
    fn id_candidates_cover_every_key_form() {
        let candidates = id_candidates(&["night-1".into(), "42".into()]);

        assert_eq!(
            candidates,
            vec![
                Bson::String("night-1".into()),
                Bson::String("42".into()),
                Bson::Int64(42),
            ]
        );
        assert_eq!(id_key(&Bson::Int32(42)), "42");
    }

    #[test]
    fn data_changes_name_the_rated_player() {
        for operation in ["insert", "update", "replace", "delete"] {
            let event = change_event(operation, Some(rating_key("p1")));
            assert_eq!(changed_player(&event).unwrap().unwrap(), "p1", "{operation}");
        }
    }

    #[test]
    fn other_events_are_ignored() {
        let event = change_event("invalidate", None);
        assert!(changed_player(&event).is_none());

        let event = change_event("drop", None);
        assert!(changed_player(&event).is_none());
    }

    #[test]
    fn data_change_without_player_id_is_malformed() {
        let event = change_event("delete", Some(doc! { "_id": "legacy-rating" }));
        assert!(matches!(
            changed_player(&event),
            Some(Err(StorageError::Malformed { .. }))
        ));

        let event = change_event("insert", None);
        assert!(matches!(
            changed_player(&event),
            Some(Err(StorageError::Malformed { .. }))
        ));
    }
}
