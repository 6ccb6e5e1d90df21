use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{league_store::LeagueStore, storage::StorageError},
    state::SharedState,
};

/// Delays used by [`supervise`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    /// Pause between health checks while the store is healthy.
    pub health_poll: Duration,
    /// First retry delay after a failed connect or reconnect.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling retry delay.
    pub max_backoff: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            health_poll: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Keep a league store installed in `state`, with the default timing.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn LeagueStore>, StorageError>> + Send,
{
    supervise(state, connect, SupervisorTiming::default()).await
}

/// Connect, install the store, then poll its health for the life of the process.
///
/// While the store fails its health check and cannot reconnect, the state is
/// degraded: job triggers answer 503, the daily run is skipped and the rating
/// watcher drops its subscription. Leaving degraded mode lets the watcher
/// resubscribe from the last change it handled.
pub async fn supervise<F, Fut>(state: SharedState, mut connect: F, timing: SupervisorTiming)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn LeagueStore>, StorageError>> + Send,
{
    let mut backoff = timing.initial_backoff;
    let store = loop {
        match connect().await {
            Ok(store) => break store,
            Err(err) => {
                warn!(
                    error = %err,
                    retry_in_ms = backoff.as_millis() as u64,
                    "league store connection failed"
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(timing.max_backoff);
            }
        }
    };
    state.install_store(store.clone()).await;
    info!("league store connected; leaving degraded mode");
    backoff = timing.initial_backoff;

    loop {
        if healthy(store.as_ref()).await {
            if state.is_degraded() {
                info!("league store healthy again; resuming jobs");
                state.update_degraded(false);
            }
            backoff = timing.initial_backoff;
            sleep(timing.health_poll).await;
        } else {
            if !state.is_degraded() {
                warn!("league store unreachable; entering degraded mode");
                state.update_degraded(true);
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(timing.max_backoff);
        }
    }
}

async fn healthy(store: &dyn LeagueStore) -> bool {
    let Err(health_err) = store.health_check().await else {
        return true;
    };
    warn!(error = %health_err, "league store health check failed");
    match store.try_reconnect().await {
        Ok(()) => {
            info!("league store reconnected after failed health check");
            true
        }
        Err(err) => {
            warn!(error = %err, "league store reconnect failed");
            false
        }
    }
}
