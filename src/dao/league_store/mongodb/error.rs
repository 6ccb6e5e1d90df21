use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB league store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB did not answer the initial ping for database `{database}`")]
    InitialPing {
        database: String,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load ratings for player `{player_id}`")]
    LoadRatings {
        player_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to merge rating aggregate into player `{player_id}`")]
    MergeAggregate {
        player_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to query game nights dated `{date}`")]
    QueryGameNights {
        date: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to commit batch closing {count} game night(s)")]
    CloseGameNights {
        count: usize,
        #[source]
        source: MongoError,
    },
    #[error("failed to open rating change stream")]
    WatchRatings {
        #[source]
        source: MongoError,
    },
}
