use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Document, doc},
    change_stream::{ChangeStream, event::ChangeStreamEvent},
    error::{Error as MongoError, ErrorKind},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    connection::ConnectionTarget,
    error::{MongoDaoError, MongoResult},
    models::{MongoGameNightDocument, MongoRatingDocument, changed_player, id_candidates},
};
use crate::dao::{
    league_store::{FeedPosition, LeagueStore, RatingChange, RatingChangeStream},
    models::{GameNightClosure, GameNightEntity, GameNightStatus, PlayerAggregate, RatingEntity},
    storage::StorageResult,
};

const RATING_COLLECTION_NAME: &str = "ratings";
const PLAYER_COLLECTION_NAME: &str = "players";
const GAME_NIGHT_COLLECTION_NAME: &str = "game_nights";
const CHANGE_STREAM_HISTORY_LOST: i32 = 286;

/// MongoDB-backed [`LeagueStore`].
///
/// Batch commits run inside a multi-document transaction, so the deployment
/// must be a replica set (which change streams require as well).
#[derive(Clone)]
pub struct MongoLeagueStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    target: ConnectionTarget,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = self.target.open().await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoLeagueStore {
    /// Connect to `database` at `uri` and ensure indexes are present.
    pub async fn connect(uri: &str, database: &str) -> MongoResult<Self> {
        let target = ConnectionTarget::parse(uri, database).await?;
        let (client, database) = target.open().await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            target,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let game_nights = database.collection::<Document>(GAME_NIGHT_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"status": 1, "date": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("game_night_status_date_idx".to_owned()))
                    .build(),
            )
            .build();
        game_nights
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GAME_NIGHT_COLLECTION_NAME,
                index: "status,date",
                source,
            })?;

        let ratings = database.collection::<Document>(RATING_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"_id.player_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("rating_player_idx".to_owned()))
                    .build(),
            )
            .build();
        ratings
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RATING_COLLECTION_NAME,
                index: "_id.player_id",
                source,
            })?;

        Ok(())
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn rating_collection(&self) -> Collection<MongoRatingDocument> {
        self.database()
            .await
            .collection::<MongoRatingDocument>(RATING_COLLECTION_NAME)
    }

    async fn game_night_collection(&self) -> Collection<MongoGameNightDocument> {
        self.database()
            .await
            .collection::<MongoGameNightDocument>(GAME_NIGHT_COLLECTION_NAME)
    }

    async fn ratings_for_player(&self, player_id: String) -> MongoResult<Vec<RatingEntity>> {
        let collection = self.rating_collection().await;

        let documents: Vec<MongoRatingDocument> = collection
            .find(doc! {"_id.player_id": player_id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadRatings {
                player_id: player_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadRatings {
                player_id: player_id.clone(),
                source,
            })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn merge_player_aggregate(
        &self,
        player_id: String,
        aggregate: PlayerAggregate,
    ) -> MongoResult<()> {
        let players = self
            .database()
            .await
            .collection::<Document>(PLAYER_COLLECTION_NAME);
        let num_ratings = i64::try_from(aggregate.num_ratings).unwrap_or(i64::MAX);

        players
            .update_one(
                doc! {"_id": player_id.as_str()},
                doc! {"$set": {"average": aggregate.average, "numRatings": num_ratings}},
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::MergeAggregate { player_id, source })?;

        Ok(())
    }

    async fn find_game_nights(
        &self,
        status: GameNightStatus,
        date: String,
    ) -> StorageResult<Vec<GameNightEntity>> {
        let collection = self.game_night_collection().await;

        let documents: Vec<MongoGameNightDocument> = collection
            .find(doc! {"status": i32::from(status.code()), "date": date.as_str()})
            .await
            .map_err(|source| MongoDaoError::QueryGameNights {
                date: date.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryGameNights {
                date: date.clone(),
                source,
            })?;

        documents
            .into_iter()
            .map(GameNightEntity::try_from)
            .collect()
    }

    async fn close_game_nights(
        &self,
        ids: Vec<String>,
        closure: GameNightClosure,
    ) -> MongoResult<u64> {
        let count = ids.len();
        let collection = self
            .database()
            .await
            .collection::<Document>(GAME_NIGHT_COLLECTION_NAME);
        let client = self.client().await;

        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::CloseGameNights { count, source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::CloseGameNights { count, source })?;

        let filter = doc! {
            "_id": {"$in": id_candidates(&ids)},
            "status": i32::from(GameNightStatus::Live.code()),
        };
        let update = doc! {
            "$set": {
                "status": i32::from(GameNightStatus::NotCompleted.code()),
                "autoCompletedReason": closure.reason,
            },
            "$currentDate": {"autoCompletedAt": true},
        };

        let result = match collection.update_many(filter, update).session(&mut session).await {
            Ok(result) => result,
            Err(source) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "failed to abort game night transaction");
                }
                return Err(MongoDaoError::CloseGameNights { count, source });
            }
        };

        session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::CloseGameNights { count, source })?;

        debug!(
            staged = count,
            modified = result.modified_count,
            "committed game night batch"
        );
        Ok(result.modified_count)
    }

    async fn rating_changes(
        &self,
        resume_after: Option<FeedPosition>,
    ) -> MongoResult<RatingChangeStream> {
        let collection = self
            .database()
            .await
            .collection::<Document>(RATING_COLLECTION_NAME);

        let token = match resume_after {
            Some(FeedPosition::ResumeToken(token)) => Some(token),
            _ => None,
        };
        let stream: ChangeStream<ChangeStreamEvent<Document>> = match token {
            Some(token) => match collection.watch().resume_after(token).await {
                Ok(stream) => stream,
                Err(source) if history_lost(&source) => {
                    warn!(error = %source, "rating change history lost; watching from now");
                    collection
                        .watch()
                        .await
                        .map_err(|source| MongoDaoError::WatchRatings { source })?
                }
                Err(source) => return Err(MongoDaoError::WatchRatings { source }),
            },
            None => collection
                .watch()
                .await
                .map_err(|source| MongoDaoError::WatchRatings { source })?,
        };

        Ok(stream
            .filter_map(|event| async move {
                match event {
                    Ok(event) => changed_player(&event).map(|player_id| {
                        player_id.map(|player_id| RatingChange {
                            player_id,
                            position: FeedPosition::ResumeToken(event.id.clone()),
                        })
                    }),
                    Err(source) => Some(Err(MongoDaoError::WatchRatings { source }.into())),
                }
            })
            .boxed())
    }
}

fn history_lost(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Command(command) if command.code == CHANGE_STREAM_HISTORY_LOST
    )
}

impl LeagueStore for MongoLeagueStore {
    fn ratings_for_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RatingEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.ratings_for_player(player_id).await.map_err(Into::into) })
    }

    fn merge_player_aggregate(
        &self,
        player_id: String,
        aggregate: PlayerAggregate,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .merge_player_aggregate(player_id, aggregate)
                .await
                .map_err(Into::into)
        })
    }

    fn find_game_nights(
        &self,
        status: GameNightStatus,
        date: String,
    ) -> BoxFuture<'static, StorageResult<Vec<GameNightEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game_nights(status, date).await })
    }

    fn close_game_nights(
        &self,
        ids: Vec<String>,
        closure: GameNightClosure,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.close_game_nights(ids, closure).await.map_err(Into::into) })
    }

    fn rating_changes(
        &self,
        resume_after: Option<FeedPosition>,
    ) -> BoxFuture<'static, StorageResult<RatingChangeStream>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rating_changes(resume_after)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
