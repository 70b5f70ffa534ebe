//! Geolocation source
//!
//! Platform location APIs sit behind the [`LocationProvider`] capability so the
//! detector can be driven by deterministic fixes in tests and in the CLI
//! `walk` command.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  LocationTracker                                                 │
//! │  ├── provider.watch_position()  ──► PositionWatch { id, updates }│
//! │  ├── forwarding task: updates ──► watch::Sender<Option<Position>>│
//! │  └── stop_tracking() / Drop ──► clear_watch(id) + abort task     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TourError, TourResult};
use crate::types::{Coordinate, Position};

/// Default deadline for a one-shot position request
pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier of a continuous position watch
pub type WatchId = u64;

/// A live subscription to position updates
pub struct PositionWatch {
    pub id: WatchId,
    pub updates: mpsc::UnboundedReceiver<TourResult<Position>>,
}

/// Device location capability
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Resolve a single position.
    ///
    /// May never complete; callers apply their own deadline.
    async fn current_position(&self) -> TourResult<Position>;

    /// Begin continuous watching. The watch stays open until `clear_watch`.
    fn watch_position(&self) -> TourResult<PositionWatch>;

    /// Cancel a watch started with `watch_position`.
    fn clear_watch(&self, id: WatchId);
}

struct ActiveWatch {
    id: WatchId,
    task: JoinHandle<()>,
}

/// Continuous position tracking over a [`LocationProvider`]
///
/// The platform watch is cancelled on `stop_tracking` and when the tracker is
/// dropped.
pub struct LocationTracker {
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
    latest: Arc<watch::Sender<Option<Position>>>,
    active: Arc<Mutex<Option<ActiveWatch>>>,
}

impl LocationTracker {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self::with_timeout(provider, DEFAULT_LOCATION_TIMEOUT)
    }

    pub fn with_timeout(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            provider,
            timeout,
            latest: Arc::new(latest),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Start watching the device position.
    ///
    /// A no-op if already tracking. Must be called inside a Tokio runtime.
    pub fn start_tracking(&self) -> TourResult<()> {
        let mut active = self.active.lock();
        if active.is_some() {
            debug!("Location tracking already active");
            return Ok(());
        }

        let PositionWatch { id, mut updates } = self.provider.watch_position()?;
        info!(watch_id = id, "Started location tracking");

        let latest = self.latest.clone();
        let slot = self.active.clone();
        let provider = self.provider.clone();
        let task = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                match update {
                    Ok(position) => {
                        latest.send_replace(Some(position));
                    }
                    Err(TourError::PermissionDenied) => {
                        warn!(watch_id = id, "Location permission revoked during watch");
                        // Release the slot only if a newer watch has not replaced it
                        let mut slot = slot.lock();
                        if slot.as_ref().is_some_and(|w| w.id == id) {
                            *slot = None;
                        }
                        drop(slot);
                        provider.clear_watch(id);
                        latest.send_replace(None);
                        break;
                    }
                    Err(e) => {
                        debug!(watch_id = id, error = %e, "Transient location error");
                    }
                }
            }
            debug!(watch_id = id, "Location watch stream ended");
        });

        *active = Some(ActiveWatch { id, task });
        Ok(())
    }

    /// Stop watching. Cancels the platform watch before returning.
    pub fn stop_tracking(&self) {
        if let Some(ActiveWatch { id, task }) = self.active.lock().take() {
            self.provider.clear_watch(id);
            task.abort();
            info!(watch_id = id, "Stopped location tracking");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.active.lock().is_some()
    }

    /// The most recent position seen by the watch.
    pub fn latest(&self) -> Option<Position> {
        *self.latest.borrow()
    }

    /// Receive every position update.
    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.latest.subscribe()
    }

    /// One-shot position request with the configured deadline.
    pub async fn get_current_position(&self) -> TourResult<Position> {
        match tokio::time::timeout(self.timeout, self.provider.current_position()).await {
            Ok(result) => result,
            Err(_) => Err(TourError::LocationTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

#[derive(Default)]
struct SimulatedState {
    next_id: WatchId,
    watches: HashMap<WatchId, mpsc::UnboundedSender<TourResult<Position>>>,
    last: Option<Position>,
    denied: bool,
    unresponsive: bool,
}

/// A scripted location provider
///
/// Positions pushed with [`SimulatedLocation::push`] are delivered to every
/// open watch and answer later one-shot requests.
#[derive(Default)]
pub struct SimulatedLocation {
    state: Mutex<SimulatedState>,
}

impl SimulatedLocation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a position to all open watches.
    pub fn push(&self, position: Position) {
        let mut state = self.state.lock();
        state.last = Some(position);
        state
            .watches
            .retain(|_, tx| tx.send(Ok(position)).is_ok());
    }

    /// Deliver a coordinate with a fixed 5 m accuracy.
    pub fn push_coordinate(&self, coordinate: Coordinate, timestamp: i64) {
        self.push(Position::new(coordinate, 5.0, timestamp));
    }

    /// Refuse all further requests with `PermissionDenied`.
    pub fn deny_permission(&self) {
        let mut state = self.state.lock();
        state.denied = true;
        for tx in state.watches.values() {
            let _ = tx.send(Err(TourError::PermissionDenied));
        }
    }

    /// Make one-shot requests hang forever.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().unresponsive = unresponsive;
    }

    pub fn active_watches(&self) -> usize {
        self.state.lock().watches.len()
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocation {
    async fn current_position(&self) -> TourResult<Position> {
        let (denied, unresponsive, last) = {
            let state = self.state.lock();
            (state.denied, state.unresponsive, state.last)
        };

        if denied {
            return Err(TourError::PermissionDenied);
        }
        if unresponsive {
            std::future::pending::<()>().await;
        }
        last.ok_or_else(|| TourError::PositionUnavailable("no fix yet".to_string()))
    }

    fn watch_position(&self) -> TourResult<PositionWatch> {
        let mut state = self.state.lock();
        if state.denied {
            return Err(TourError::PermissionDenied);
        }

        state.next_id += 1;
        let id = state.next_id;
        let (tx, updates) = mpsc::unbounded_channel();
        if let Some(last) = state.last {
            let _ = tx.send(Ok(last));
        }
        state.watches.insert(id, tx);

        Ok(PositionWatch { id, updates })
    }

    fn clear_watch(&self, id: WatchId) {
        self.state.lock().watches.remove(&id);
    }
}
