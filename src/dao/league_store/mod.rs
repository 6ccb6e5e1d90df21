pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};

use crate::{
    config::StoreSettings,
    dao::{
        models::{GameNightClosure, GameNightEntity, GameNightStatus, PlayerAggregate, RatingEntity},
        storage::{StorageError, StorageResult},
    },
};

/// Stream of rating changes, one item per created, updated or deleted rating.
pub type RatingChangeStream = BoxStream<'static, StorageResult<RatingChange>>;

/// Point in a rating change feed a later subscription can continue from.
///
/// Positions are backend specific; a store handed a position it does not
/// recognise subscribes from the current end of its feed.
#[derive(Debug, Clone)]
pub enum FeedPosition {
    /// Sequence number of the in-memory change log.
    Sequence(u64),
    /// MongoDB change stream resume token.
    #[cfg(feature = "mongo-store")]
    ResumeToken(::mongodb::change_stream::event::ResumeToken),
}

/// One notification from the rating change feed.
#[derive(Debug, Clone)]
pub struct RatingChange {
    /// Player whose rating set changed.
    pub player_id: String,
    /// Position just after this change.
    pub position: FeedPosition,
}

/// Abstraction over the league document store used by the background jobs.
pub trait LeagueStore: Send + Sync {
    /// Every rating currently stored for `player_id`.
    fn ratings_for_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RatingEntity>>>;
    /// Merge `average`/`numRatings` into the player record, leaving other fields untouched.
    fn merge_player_aggregate(
        &self,
        player_id: String,
        aggregate: PlayerAggregate,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Game nights matching both `status` and `date` exactly.
    fn find_game_nights(
        &self,
        status: GameNightStatus,
        date: String,
    ) -> BoxFuture<'static, StorageResult<Vec<GameNightEntity>>>;
    /// Atomically move the given live game nights to not-completed.
    ///
    /// Either every still-live record listed in `ids` transitions or none
    /// does. Returns the number of records that were transitioned.
    fn close_game_nights(
        &self,
        ids: Vec<String>,
        closure: GameNightClosure,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    /// Subscribe to rating change notifications.
    ///
    /// With `resume_after`, changes recorded after that position are delivered
    /// first, so nothing written while the caller was unsubscribed is lost.
    fn rating_changes(
        &self,
        resume_after: Option<FeedPosition>,
    ) -> BoxFuture<'static, StorageResult<RatingChangeStream>>;
    /// Cheap round-trip proving the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the underlying connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Open the store described by `settings`.
pub async fn connect(settings: &StoreSettings) -> StorageResult<Arc<dyn LeagueStore>> {
    match settings {
        StoreSettings::Memory => Ok(Arc::new(memory::MemoryLeagueStore::new())),
        #[cfg(feature = "mongo-store")]
        StoreSettings::Mongo { uri, database } => {
            let store = mongodb::MongoLeagueStore::connect(uri, database).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo-store"))]
        StoreSettings::Mongo { .. } => Err(StorageError::unavailable(
            "MongoDB backend requested".into(),
            std::io::Error::other("built without the `mongo-store` feature"),
        )),
    }
}

#[cfg(feature = "mongo-store")]
impl From<mongodb::MongoDaoError> for StorageError {
    fn from(err: mongodb::MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
