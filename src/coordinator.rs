//! EntityCoordinator - lifecycle of the controller's media-player entities
//!
//! Setup fetches the controller status once and freezes the entity set:
//! sources, then zones, then groups, in controller order. Records that
//! appear later are not picked up until restart; records that disappear
//! leave their entity in place as unavailable.
//!
//! After setup each entity polls on its own task at the configured
//! interval. Commands arriving on the bus (MQTT) run on their own tasks and
//! are serialized per entity by the entity's turn lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterContext, AdapterHandle, AdapterLogic, RetryConfig};
use crate::bus::{BusEvent, SharedBus};
use crate::entity::{
    CommandOutcome, EntityCommand, EntityKey, MediaPlayer, MediaPlayerView, ReconcileContext,
};
use crate::media::BrowseMedia;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotFetcher};

const ADAPTER_NAME: &str = "amplipi";

/// Time allowed for the polling adapter to acknowledge shutdown.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("controller entities are not set up yet")]
    NotReady,

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

// =============================================================================
// Registry
// =============================================================================

/// The fixed entity set built at setup.
pub struct EntityRegistry {
    players: Vec<Arc<MediaPlayer>>,
    by_id: HashMap<String, Arc<MediaPlayer>>,
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.by_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityRegistry {
    pub fn build(
        snapshot: &Snapshot,
        fetcher: &SnapshotFetcher,
        ctx: &Arc<ReconcileContext>,
        bus: &SharedBus,
    ) -> Self {
        let keys = snapshot
            .sources()
            .iter()
            .map(|s| EntityKey::Source(s.id))
            .chain(snapshot.zones().iter().map(|z| EntityKey::Zone(z.id)))
            .chain(snapshot.groups().iter().map(|g| EntityKey::Group(g.id)));

        let players: Vec<Arc<MediaPlayer>> = keys
            .map(|key| {
                Arc::new(MediaPlayer::new(
                    key,
                    snapshot,
                    fetcher.clone(),
                    ctx.clone(),
                    bus.clone(),
                ))
            })
            .collect();

        let by_id = players
            .iter()
            .map(|p| (p.unique_id(), p.clone()))
            .collect();

        Self { players, by_id }
    }

    /// Entities in registration order.
    pub fn players(&self) -> &[Arc<MediaPlayer>] {
        &self.players
    }

    pub fn get(&self, unique_id: &str) -> Option<&Arc<MediaPlayer>> {
        self.by_id.get(unique_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub async fn views(&self) -> Vec<MediaPlayerView> {
        let mut views = Vec::with_capacity(self.players.len());
        for player in &self.players {
            views.push(player.view().await);
        }
        views
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Debug, Default)]
struct CoordinatorState {
    running: bool,
    firmware_version: Option<String>,
}

/// Owns the entity registry and drives polling and bus commands.
#[derive(Clone)]
pub struct EntityCoordinator {
    fetcher: SnapshotFetcher,
    base_url: String,
    ctx: Arc<ReconcileContext>,
    bus: SharedBus,
    poll_interval: Duration,
    registry: Arc<OnceCell<Arc<EntityRegistry>>>,
    state: Arc<RwLock<CoordinatorState>>,
    shutdown: Arc<RwLock<CancellationToken>>,
}

impl EntityCoordinator {
    pub fn new(
        fetcher: SnapshotFetcher,
        base_url: impl Into<String>,
        ctx: Arc<ReconcileContext>,
        bus: SharedBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            ctx,
            bus,
            poll_interval,
            registry: Arc::new(OnceCell::new()),
            state: Arc::new(RwLock::new(CoordinatorState::default())),
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch once and build the registry. Later calls return the same
    /// registry without touching the controller.
    pub async fn setup(&self) -> Result<Arc<EntityRegistry>, SnapshotError> {
        let registry = self
            .registry
            .get_or_try_init(|| async {
                let snapshot = self.fetcher.fetch().await?;
                let registry = EntityRegistry::build(&snapshot, &self.fetcher, &self.ctx, &self.bus);

                self.state.write().await.firmware_version = snapshot
                    .status()
                    .info
                    .as_ref()
                    .and_then(|info| info.version.clone());

                info!(
                    sources = snapshot.sources().len(),
                    zones = snapshot.zones().len(),
                    groups = snapshot.groups().len(),
                    "Registered {} AmpliPi entities",
                    registry.len()
                );
                for player in registry.players() {
                    self.bus.publish(BusEvent::EntityDiscovered {
                        view: player.view().await,
                    });
                }
                Ok::<_, SnapshotError>(Arc::new(registry))
            })
            .await?;
        Ok(registry.clone())
    }

    /// Registry, if setup has completed.
    pub fn registry(&self) -> Option<Arc<EntityRegistry>> {
        self.registry.get().cloned()
    }

    pub async fn firmware_version(&self) -> Option<String> {
        self.state.read().await.firmware_version.clone()
    }

    fn player(&self, entity_id: &str) -> Result<Arc<MediaPlayer>, CoordinatorError> {
        let registry = self.registry().ok_or(CoordinatorError::NotReady)?;
        registry
            .get(entity_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownEntity(entity_id.to_string()))
    }

    pub async fn view(&self, entity_id: &str) -> Result<MediaPlayerView, CoordinatorError> {
        Ok(self.player(entity_id)?.view().await)
    }

    pub async fn command(
        &self,
        entity_id: &str,
        command: EntityCommand,
    ) -> Result<CommandOutcome, CoordinatorError> {
        let player = self.player(entity_id)?;
        Ok(player.command(command.into()).await)
    }

    pub async fn browse(&self, entity_id: &str) -> Result<BrowseMedia, CoordinatorError> {
        let player = self.player(entity_id)?;
        Ok(player.browse().await?)
    }

    /// Poll every entity until `shutdown` fires.
    pub fn run_polling(
        &self,
        registry: &EntityRegistry,
        shutdown: &CancellationToken,
    ) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for player in registry.players() {
            tasks.spawn(poll_entity(
                player.clone(),
                self.poll_interval,
                shutdown.clone(),
            ));
        }
        tasks
    }

    /// Publish ShuttingDown, wait for the polling adapter to acknowledge,
    /// then cancel whatever is left.
    pub async fn shutdown(&self) {
        let mut rx = self.bus.subscribe();
        let running = self.state.read().await.running;

        self.bus.publish(BusEvent::ShuttingDown {
            reason: Some("Coordinator shutdown".to_string()),
        });

        if running {
            let ack = tokio::time::timeout(SHUTDOWN_ACK_TIMEOUT, async {
                loop {
                    match rx.recv().await {
                        Ok(BusEvent::AdapterStopped { adapter }) if adapter == ADAPTER_NAME => {
                            break true
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break false,
                    }
                }
            })
            .await;
            if !matches!(ack, Ok(true)) {
                warn!("No shutdown ACK from {}, forcing stop", ADAPTER_NAME);
            }
        }

        self.stop_internal().await;
        info!("Coordinator shutdown complete");
    }

    async fn start_internal(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let handle = AdapterHandle::new(self.clone(), self.bus.clone(), shutdown);
        tokio::spawn(async move { handle.run_with_retry(RetryConfig::default()).await });

        Ok(())
    }

    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
        self.state.write().await.running = false;
    }

    fn spawn_command(
        &self,
        commands: &mut JoinSet<()>,
        registry: &EntityRegistry,
        entity_id: String,
        command: EntityCommand,
        request_id: Option<String>,
    ) {
        let bus = self.bus.clone();
        let Some(player) = registry.get(&entity_id).cloned() else {
            warn!(entity = %entity_id, "Command for unknown entity");
            bus.publish(BusEvent::CommandResult {
                outcome: CommandOutcome::Ignored {
                    reason: format!("unknown entity: {}", entity_id),
                },
                entity_id,
                request_id,
            });
            return;
        };

        commands.spawn(async move {
            let outcome = player.command(command.into()).await;
            bus.publish(BusEvent::CommandResult {
                entity_id,
                outcome,
                request_id,
            });
        });
    }
}

async fn poll_entity(player: Arc<MediaPlayer>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; setup has just reconciled
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => player.refresh().await,
        }
    }
    debug!(entity = %player.key(), "Polling stopped");
}

#[async_trait]
impl AdapterLogic for EntityCoordinator {
    fn prefix(&self) -> &'static str {
        ADAPTER_NAME
    }

    async fn run(&self, ctx: AdapterContext) -> Result<()> {
        // Subscribe before announcing so no command is missed
        let mut rx = ctx.bus.subscribe();

        let registry = match self.setup().await {
            Ok(registry) => registry,
            Err(e) => {
                ctx.bus.publish(BusEvent::ControllerDisconnected {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        ctx.bus.publish(BusEvent::ControllerConnected {
            base_url: self.base_url.clone(),
        });

        let mut polls = self.run_polling(&registry, &ctx.shutdown);
        let mut commands = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(BusEvent::CommandReceived { entity_id, command, request_id }) => {
                        self.spawn_command(&mut commands, &registry, entity_id, command, request_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("Command consumer lagged, skipped {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(_) = commands.join_next(), if !commands.is_empty() => {}
            }
        }

        polls.shutdown().await;
        commands.shutdown().await;
        Ok(())
    }
}

crate::impl_startable!(EntityCoordinator, "amplipi");

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::amplipi::{
        AmpliPiApi, Announcement, ApiError, GroupUpdate, MultiZoneUpdate, SourceUpdate, Status,
        StreamCommand, ZoneUpdate,
    };
    use crate::bus::EventBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Read-only controller that counts status fetches.
    struct StaticApi {
        status: Status,
        fetches: AtomicUsize,
        offline: AtomicBool,
    }

    #[async_trait]
    impl AmpliPiApi for StaticApi {
        async fn get_status(&self) -> Result<Status, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(self.status.clone())
        }
        async fn set_zone(&self, _: u32, _: &ZoneUpdate) -> Result<(), ApiError> {
            Ok(())
        }
        async fn set_zones(&self, _: &MultiZoneUpdate) -> Result<(), ApiError> {
            Ok(())
        }
        async fn set_source(&self, _: u32, _: &SourceUpdate) -> Result<(), ApiError> {
            Ok(())
        }
        async fn set_group(&self, _: u32, _: &GroupUpdate) -> Result<(), ApiError> {
            Ok(())
        }
        async fn stream_command(&self, _: u32, _: StreamCommand) -> Result<(), ApiError> {
            Ok(())
        }
        async fn announce(&self, _: &Announcement) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn api(offline: bool) -> Arc<StaticApi> {
        Arc::new(StaticApi {
            status: serde_json::from_value(json!({
                "sources": [{"id": 0, "name": "A"}, {"id": 1, "name": "B"}],
                "zones": [{"id": 2, "name": "Kitchen", "source_id": 0}],
                "groups": [{"id": 7, "name": "Down", "zones": [2]}],
                "streams": []
            }))
            .unwrap(),
            fetches: AtomicUsize::new(0),
            offline: AtomicBool::new(offline),
        })
    }

    fn coordinator(api: &Arc<StaticApi>, bus: SharedBus) -> EntityCoordinator {
        EntityCoordinator::new(
            SnapshotFetcher::new(api.clone()),
            "http://amplipi.test/api",
            Arc::new(ReconcileContext::default()),
            bus,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_setup_registers_entities_in_controller_order() {
        let api = api(false);
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let coord = coordinator(&api, bus);

        let registry = coord.setup().await.unwrap();
        let ids: Vec<String> = registry.players().iter().map(|p| p.unique_id()).collect();
        assert_eq!(
            ids,
            vec![
                "amplipi_source_0",
                "amplipi_source_1",
                "amplipi_zone_2",
                "amplipi_group_7"
            ]
        );

        for expected in &ids {
            match rx.try_recv().unwrap() {
                BusEvent::EntityDiscovered { view } => assert_eq!(&view.unique_id, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_setup_runs_once() {
        let api = api(false);
        let coord = coordinator(&api, Arc::new(EventBus::new(32)));

        let first = coord.setup().await.unwrap();
        let second = coord.setup().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_setup_can_be_retried() {
        let api = api(true);
        let coord = coordinator(&api, Arc::new(EventBus::new(32)));

        tokio_test::assert_err!(coord.setup().await);
        assert!(coord.registry().is_none());
        assert!(matches!(
            coord.view("amplipi_zone_2").await,
            Err(CoordinatorError::NotReady)
        ));

        api.offline.store(false, Ordering::SeqCst);
        assert_eq!(coord.setup().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let api = api(false);
        let coord = coordinator(&api, Arc::new(EventBus::new(32)));
        coord.setup().await.unwrap();

        assert!(matches!(
            coord.command("amplipi_zone_99", EntityCommand::Play).await,
            Err(CoordinatorError::UnknownEntity(_))
        ));
        assert_eq!(
            coord.view("amplipi_group_7").await.unwrap().name,
            "Down"
        );
    }

    #[tokio::test]
    async fn test_bus_command_answered_with_result() {
        use crate::adapters::Startable;

        let api = api(false);
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let coord = coordinator(&api, bus.clone());
        coord.start().await.unwrap();

        // Wait for the adapter to come up
        loop {
            if let BusEvent::ControllerConnected { .. } = rx.recv().await.unwrap() {
                break;
            }
        }

        bus.publish(BusEvent::CommandReceived {
            entity_id: "amplipi_zone_2".to_string(),
            command: EntityCommand::Mute { muted: true },
            request_id: Some("req-1".to_string()),
        });
        bus.publish(BusEvent::CommandReceived {
            entity_id: "amplipi_zone_42".to_string(),
            command: EntityCommand::Play,
            request_id: None,
        });

        let mut results = Vec::new();
        while results.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for command results")
                .unwrap();
            if let BusEvent::CommandResult { entity_id, outcome, request_id } = event {
                results.push((entity_id, outcome, request_id));
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(results[0].0, "amplipi_zone_2");
        assert_eq!(results[0].1, CommandOutcome::Applied);
        assert_eq!(results[0].2.as_deref(), Some("req-1"));
        assert_eq!(results[1].0, "amplipi_zone_42");
        assert!(matches!(results[1].1, CommandOutcome::Ignored { .. }));

        coord.shutdown().await;
    }
}
