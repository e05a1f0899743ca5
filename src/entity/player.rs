//! One media-player entity.
//!
//! A `MediaPlayer` owns the view of a single source, zone or group. Refreshes
//! and commands take the entity's turn lock for their whole duration, so a
//! poll can never interleave with a command's fetch/execute/re-sync sequence.
//! Different entities proceed concurrently.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::dispatch::{execute, plan};
use super::reconcile::{entity_name, reconcile};
use super::{CommandOutcome, EntityKey, Intent, MediaPlayerView, ReconcileContext};
use crate::bus::{BusEvent, SharedBus};
use crate::media::{browse_streams, BrowseMedia};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotFetcher};

pub struct MediaPlayer {
    key: EntityKey,
    fetcher: SnapshotFetcher,
    ctx: Arc<ReconcileContext>,
    bus: SharedBus,
    /// Held for the duration of a refresh or command.
    turn: Mutex<()>,
    view: RwLock<MediaPlayerView>,
}

impl MediaPlayer {
    /// Build the entity from the snapshot taken at setup.
    pub fn new(
        key: EntityKey,
        snapshot: &Snapshot,
        fetcher: SnapshotFetcher,
        ctx: Arc<ReconcileContext>,
        bus: SharedBus,
    ) -> Self {
        let view = reconcile(snapshot, key, &ctx).unwrap_or_else(|| {
            MediaPlayerView::unavailable(key, entity_name(snapshot, key, &ctx))
        });
        Self {
            key,
            fetcher,
            ctx,
            bus,
            turn: Mutex::new(()),
            view: RwLock::new(view),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn unique_id(&self) -> String {
        self.key.unique_id()
    }

    /// Current view.
    pub async fn view(&self) -> MediaPlayerView {
        self.view.read().await.clone()
    }

    /// Fetch a fresh snapshot and reconcile.
    pub async fn refresh(&self) {
        let turn = self.turn.lock().await;
        self.resync().await;
        drop(turn);
    }

    /// Apply a user intent and re-synchronize.
    ///
    /// Never fails: controller errors are reported in the outcome and reflected
    /// in the view.
    pub async fn command(&self, intent: Intent) -> CommandOutcome {
        let turn = self.turn.lock().await;
        let outcome = self.run_command(intent).await;
        drop(turn);
        outcome
    }

    /// Stream directory for media browsing.
    pub async fn browse(&self) -> Result<BrowseMedia, SnapshotError> {
        let snapshot = self.fetcher.fetch().await?;
        Ok(browse_streams(&snapshot))
    }

    async fn run_command(&self, intent: Intent) -> CommandOutcome {
        let snapshot = match self.fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(entity = %self.key, "Command aborted, status fetch failed: {}", e);
                self.mark_unavailable(e.to_string()).await;
                return CommandOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let dispatch = match plan(&snapshot, self.key, &intent, &self.ctx) {
            Ok(dispatch) => dispatch,
            Err(reason) => {
                warn!(entity = %self.key, ?intent, "Ignoring command: {}", reason);
                self.apply(&snapshot).await;
                return CommandOutcome::Ignored {
                    reason: reason.to_string(),
                };
            }
        };

        let outcome = match execute(self.fetcher.api().as_ref(), &dispatch).await {
            Ok(()) => {
                info!(entity = %self.key, ?intent, "Command applied");
                CommandOutcome::Applied
            }
            Err(e) => {
                warn!(entity = %self.key, ?intent, "Command failed: {}", e);
                CommandOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        self.resync().await;
        outcome
    }

    async fn resync(&self) {
        match self.fetcher.fetch().await {
            Ok(snapshot) => self.apply(&snapshot).await,
            Err(e) => {
                if e.is_transient() {
                    debug!(entity = %self.key, "Status fetch failed: {}", e);
                } else {
                    warn!(entity = %self.key, "Status fetch failed: {}", e);
                }
                self.mark_unavailable(e.to_string()).await;
            }
        }
    }

    async fn apply(&self, snapshot: &Snapshot) {
        match reconcile(snapshot, self.key, &self.ctx) {
            Some(view) => self.publish_if_changed(view, None).await,
            None => {
                warn!(entity = %self.key, "Record no longer present on controller");
                self.mark_unavailable("record missing from controller status".to_string())
                    .await;
            }
        }
    }

    async fn mark_unavailable(&self, reason: String) {
        let name = self.view.read().await.name.clone();
        let view = MediaPlayerView::unavailable(self.key, name);
        self.publish_if_changed(view, Some(reason)).await;
    }

    async fn publish_if_changed(&self, view: MediaPlayerView, reason: Option<String>) {
        if *self.view.read().await == view {
            return;
        }
        *self.view.write().await = view.clone();

        if view.available {
            debug!(entity = %self.key, state = %view.state, "Entity updated");
            self.bus.publish(BusEvent::EntityUpdated { view });
        } else {
            self.bus.publish(BusEvent::EntityUnavailable {
                entity_id: view.unique_id,
                reason: reason.unwrap_or_else(|| "unavailable".to_string()),
            });
        }
    }
}
