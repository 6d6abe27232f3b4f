//! Map rotation
//!
//! Every cycle advances to the next map in the pool, installs it in the
//! session store, marks every player dead and broadcasts the raw map to the
//! global room. All four steps happen under one store lock so no intent can
//! observe a half-rotated session.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::game::constants::room::GLOBAL_ROOM;
use crate::game::map::MapEntry;
use crate::game::state::SessionStore;
use crate::metrics::Metrics;
use crate::net::hub::Outbox;
use crate::net::protocol::ServerMessage;

/// Source of rotation cycles
pub trait Ticker: Send + 'static {
    /// Wait for the next cycle. Returns false once no more cycles will come.
    fn tick(&mut self) -> impl Future<Output = bool> + Send;
}

/// Wall-clock ticker. The first tick fires one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl Ticker for IntervalTicker {
    fn tick(&mut self) -> impl Future<Output = bool> + Send {
        async move {
            self.interval.tick().await;
            true
        }
    }
}

/// Maps available for rotation, in stored order
#[derive(Debug, Clone, Default)]
pub struct MapPool {
    maps: Vec<MapEntry>,
}

impl MapPool {
    pub fn new(maps: Vec<MapEntry>) -> Self {
        Self { maps }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MapEntry> {
        self.maps.get(index)
    }
}

/// What one rotation cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Loaded { index: usize, map_id: i64, dead: usize },
    EmptyPool,
    /// The map at `index` did not parse; the previous map stays active
    ParseFailed { index: usize, map_id: i64, reason: String },
}

pub struct MapRotation {
    pool: MapPool,
    store: Arc<SessionStore>,
    outbox: Arc<dyn Outbox>,
    metrics: Arc<Metrics>,
}

impl MapRotation {
    pub fn new(
        pool: MapPool,
        store: Arc<SessionStore>,
        outbox: Arc<dyn Outbox>,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics
            .map_pool_size
            .store(pool.len() as u64, Ordering::Relaxed);
        Self {
            pool,
            store,
            outbox,
            metrics,
        }
    }

    /// Run one cycle
    pub fn run_cycle(&self) -> CycleOutcome {
        let outcome = self.store.atomically(|state| {
            let Some(index) = state.advance_rotation(self.pool.len()) else {
                return CycleOutcome::EmptyPool;
            };
            let Some(entry) = self.pool.get(index) else {
                return CycleOutcome::EmptyPool;
            };

            if let Err(e) = state.set_map(&entry.code) {
                return CycleOutcome::ParseFailed {
                    index,
                    map_id: entry.id,
                    reason: e.to_string(),
                };
            }
            let dead = state.mark_all_dead();
            self.outbox
                .broadcast(GLOBAL_ROOM, &ServerMessage::LoadMap(entry.code.clone()));

            CycleOutcome::Loaded {
                index,
                map_id: entry.id,
                dead,
            }
        });

        match &outcome {
            CycleOutcome::Loaded { index, map_id, dead } => {
                self.metrics.record_rotation(*index);
                info!("Rotated to map {} (index {}), {} players respawning", map_id, index, dead);
            }
            CycleOutcome::EmptyPool => warn!("Map pool is empty, skipping rotation"),
            CycleOutcome::ParseFailed { index, map_id, reason } => {
                self.metrics.rotation_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Map {} (index {}) rejected, keeping current map: {}", map_id, index, reason);
            }
        }
        self.metrics.update_store(self.store.stats());

        outcome
    }

    /// Run cycle zero now, then one cycle per tick until stopped.
    ///
    /// Fails without spawning anything unless cycle zero installs a map, so
    /// the server never accepts players with no map to send them.
    /// Dropping the returned handle stops the rotation.
    pub fn start<T: Ticker>(self, mut ticker: T) -> Result<RotationHandle, RotationError> {
        match self.run_cycle() {
            CycleOutcome::Loaded { .. } => {}
            CycleOutcome::EmptyPool => return Err(RotationError::EmptyPool),
            CycleOutcome::ParseFailed { map_id, reason, .. } => {
                return Err(RotationError::FirstMapRejected { map_id, reason });
            }
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    more = ticker.tick() => {
                        if !more {
                            break;
                        }
                        self.run_cycle();
                    }
                }
            }
            info!("Map rotation stopped");
        });

        Ok(RotationHandle {
            stop: Some(stop_tx),
            task,
        })
    }
}

/// Why the rotation could not start
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    #[error("Map pool is empty")]
    EmptyPool,
    #[error("First map {map_id} is unusable: {reason}")]
    FirstMapRejected { map_id: i64, reason: String },
}

/// Control handle for a running rotation
pub struct RotationHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Stop the rotation and wait for it to wind down
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Map rotation task failed: {}", e);
        }
    }

    /// Wait for the ticker to run out
    pub async fn join(mut self) {
        if let Err(e) = (&mut self.task).await {
            warn!("Map rotation task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
