//! Process-local [`LeagueStore`] used for dry runs and tests.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::Arc,
};

use futures::{StreamExt, future::BoxFuture, stream};
use serde_json::{Map, Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

use super::{FeedPosition, LeagueStore, RatingChange, RatingChangeStream};
use crate::dao::{
    models::{
        GameNightClosure, GameNightEntity, GameNightStatus, PlayerAggregate, RatingEntity,
        RatingValue,
    },
    storage::{StorageError, StorageResult},
};

const CHANGE_FEED_CAPACITY: usize = 256;
const CHANGE_LOG_CAPACITY: usize = 1_024;

/// In-memory league store holding JSON documents.
#[derive(Clone)]
pub struct MemoryLeagueStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    data: RwLock<MemoryData>,
    changes: broadcast::Sender<FeedEvent>,
    fail_commit_after: Mutex<Option<usize>>,
}

#[derive(Clone)]
enum FeedEvent {
    Change(u64, String),
    Interrupted,
}

#[derive(Default)]
struct MemoryData {
    ratings: BTreeMap<(String, String), Value>,
    players: HashMap<String, Map<String, Value>>,
    game_nights: BTreeMap<String, Map<String, Value>>,
    change_log: VecDeque<(u64, String)>,
    last_sequence: u64,
}

impl Default for MemoryLeagueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeagueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(MemoryData::default()),
                changes,
                fail_commit_after: Mutex::new(None),
            }),
        }
    }

    /// Create or replace the rating `rater_id` gave to `player_id`.
    pub async fn put_rating(&self, player_id: &str, rater_id: &str, value: Value) {
        let mut data = self.inner.data.write().await;
        data.ratings
            .insert((player_id.to_owned(), rater_id.to_owned()), value);
        self.publish(&mut data, player_id);
    }

    /// Delete a rating, returning whether it existed.
    pub async fn delete_rating(&self, player_id: &str, rater_id: &str) -> bool {
        let mut data = self.inner.data.write().await;
        let removed = data
            .ratings
            .remove(&(player_id.to_owned(), rater_id.to_owned()))
            .is_some();
        if removed {
            self.publish(&mut data, player_id);
        }
        removed
    }

    /// Replace a player record.
    pub async fn put_player(&self, player_id: &str, record: Map<String, Value>) {
        let mut data = self.inner.data.write().await;
        data.players.insert(player_id.to_owned(), record);
    }

    /// Current player record, if any.
    pub async fn player(&self, player_id: &str) -> Option<Map<String, Value>> {
        let data = self.inner.data.read().await;
        data.players.get(player_id).cloned()
    }

    /// Replace a game night document.
    pub async fn put_game_night(&self, id: &str, record: Map<String, Value>) {
        let mut data = self.inner.data.write().await;
        data.game_nights.insert(id.to_owned(), record);
    }

    /// Current game night document, if any.
    pub async fn game_night(&self, id: &str) -> Option<Map<String, Value>> {
        let data = self.inner.data.read().await;
        data.game_nights.get(id).cloned()
    }

    /// Make the next batch commit fail after staging `staged` updates.
    pub async fn fail_next_commit_after(&self, staged: usize) {
        *self.inner.fail_commit_after.lock().await = Some(staged);
    }

    /// End every open change feed subscription with an error.
    pub fn interrupt_rating_changes(&self) {
        let _ = self.inner.changes.send(FeedEvent::Interrupted);
    }

    // Called with the data lock held so the log and the broadcast agree on ordering.
    fn publish(&self, data: &mut MemoryData, player_id: &str) {
        data.last_sequence += 1;
        if data.change_log.len() == CHANGE_LOG_CAPACITY {
            data.change_log.pop_front();
        }
        data.change_log
            .push_back((data.last_sequence, player_id.to_owned()));
        // No subscribers is fine: the log keeps the change for resumed feeds.
        let _ = self
            .inner
            .changes
            .send(FeedEvent::Change(data.last_sequence, player_id.to_owned()));
    }

    async fn ratings_for_player(&self, player_id: &str) -> Vec<RatingEntity> {
        let data = self.inner.data.read().await;
        data.ratings
            .iter()
            .filter(|((player, _), _)| player == player_id)
            .map(|((player, rater), value)| RatingEntity {
                player_id: player.clone(),
                rater_id: rater.clone(),
                value: RatingValue::from(value),
            })
            .collect()
    }

    async fn merge_player_aggregate(&self, player_id: String, aggregate: PlayerAggregate) {
        let mut data = self.inner.data.write().await;
        let record = data.players.entry(player_id).or_default();
        record.insert("average".into(), json!(aggregate.average));
        record.insert("numRatings".into(), json!(aggregate.num_ratings));
    }

    // Records that do not match are never interpreted, whatever their content.
    async fn find_game_nights(&self, status: GameNightStatus, date: &str) -> Vec<GameNightEntity> {
        let data = self.inner.data.read().await;
        data.game_nights
            .iter()
            .filter(|(_, record)| {
                record.get("date").and_then(Value::as_str) == Some(date)
                    && status_code(record) == Some(status.code())
            })
            .map(|(id, _)| GameNightEntity {
                id: id.clone(),
                date: date.to_owned(),
                status,
            })
            .collect()
    }

    async fn close_game_nights(
        &self,
        ids: Vec<String>,
        closure: GameNightClosure,
    ) -> StorageResult<u64> {
        let fail_after = self.inner.fail_commit_after.lock().await.take();
        let completed_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|source| StorageError::unavailable("formatting timestamp".into(), source))?;

        let mut data = self.inner.data.write().await;
        let mut staged = data.game_nights.clone();
        let mut closed = 0;

        for id in &ids {
            if fail_after.is_some_and(|limit| closed as usize >= limit) {
                return Err(StorageError::unavailable(
                    format!("batch commit of {} game nights aborted", ids.len()),
                    io::Error::other("injected commit failure"),
                ));
            }
            let Some(record) = staged.get_mut(id) else {
                continue;
            };
            if status_code(record) != Some(GameNightStatus::Live.code()) {
                continue;
            }
            record.insert("status".into(), json!(GameNightStatus::NotCompleted.code()));
            record.insert("autoCompletedAt".into(), json!(completed_at));
            record.insert("autoCompletedReason".into(), json!(closure.reason));
            closed += 1;
        }

        data.game_nights = staged;
        Ok(closed)
    }

    async fn rating_changes(&self, resume_after: Option<FeedPosition>) -> RatingChangeStream {
        let after = match resume_after {
            Some(FeedPosition::Sequence(sequence)) => Some(sequence),
            _ => None,
        };

        // Subscribe and snapshot under one lock: every change lands in exactly one of the two.
        let (receiver, backlog) = {
            let data = self.inner.data.read().await;
            let receiver = self.inner.changes.subscribe();
            let backlog: Vec<(u64, String)> = match after {
                Some(after) => {
                    if data
                        .change_log
                        .front()
                        .is_some_and(|(oldest, _)| *oldest > after + 1)
                    {
                        warn!(after, "in-memory change log no longer reaches resume position");
                    }
                    data.change_log
                        .iter()
                        .filter(|(sequence, _)| *sequence > after)
                        .cloned()
                        .collect()
                }
                None => Vec::new(),
            };
            (receiver, backlog)
        };

        let live = BroadcastStream::new(receiver).filter_map(|event| async move {
            match event {
                Ok(FeedEvent::Change(sequence, player_id)) => Some(Ok((sequence, player_id))),
                Ok(FeedEvent::Interrupted) => Some(Err(StorageError::unavailable(
                    "in-memory rating change feed interrupted".into(),
                    io::Error::other("feed interrupted"),
                ))),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "in-memory rating change feed lagged");
                    None
                }
            }
        });

        stream::iter(backlog.into_iter().map(Ok))
            .chain(live)
            .map(|change| {
                change.map(|(sequence, player_id)| RatingChange {
                    player_id,
                    position: FeedPosition::Sequence(sequence),
                })
            })
            .boxed()
    }
}

/// Numeric status code of a stored game night; integral doubles count.
fn status_code(record: &Map<String, Value>) -> Option<u8> {
    let status = record.get("status")?;
    let code = match status.as_u64() {
        Some(code) => code,
        None => {
            let code = status.as_f64()?;
            if code.fract() != 0.0 || code < 0.0 {
                return None;
            }
            code as u64
        }
    };
    u8::try_from(code).ok()
}

impl LeagueStore for MemoryLeagueStore {
    fn ratings_for_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<RatingEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.ratings_for_player(&player_id).await) })
    }

    fn merge_player_aggregate(
        &self,
        player_id: String,
        aggregate: PlayerAggregate,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.merge_player_aggregate(player_id, aggregate).await;
            Ok(())
        })
    }

    fn find_game_nights(
        &self,
        status: GameNightStatus,
        date: String,
    ) -> BoxFuture<'static, StorageResult<Vec<GameNightEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_game_nights(status, &date).await) })
    }

    fn close_game_nights(
        &self,
        ids: Vec<String>,
        closure: GameNightClosure,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.close_game_nights(ids, closure).await })
    }

    fn rating_changes(
        &self,
        resume_after: Option<FeedPosition>,
    ) -> BoxFuture<'static, StorageResult<RatingChangeStream>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.rating_changes(resume_after).await) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
