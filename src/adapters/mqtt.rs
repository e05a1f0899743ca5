//! MQTT Adapter
//!
//! Bridges the internal event bus to MQTT for Home Assistant style
//! automation. Topics, under the configured prefix:
//!
//! | Topic                                   | Direction | Retained | Payload                 |
//! |-----------------------------------------|-----------|----------|-------------------------|
//! | `{prefix}/status`                       | out       | yes      | `online` / `offline` (LWT) |
//! | `{prefix}/entities/{id}/state`          | out       | yes      | entity view JSON        |
//! | `{prefix}/entities/{id}/availability`   | out       | yes      | `online` / `offline`    |
//! | `{prefix}/entities/{id}/result`         | out       | no       | command outcome JSON    |
//! | `{prefix}/entities/{id}/command`        | in        |          | `EntityCommand` JSON, optional `request_id` |

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::config::MqttConfig;
use crate::entity::EntityCommand;

const CLIENT_ID: &str = "amplipi-control";
const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

/// MQTT connection status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatus {
    pub connected: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub topic_prefix: Option<String>,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

// =============================================================================
// Topics
// =============================================================================

pub fn bridge_status_topic(prefix: &str) -> String {
    format!("{}/status", prefix)
}

pub fn state_topic(prefix: &str, entity_id: &str) -> String {
    format!("{}/entities/{}/state", prefix, entity_id)
}

pub fn availability_topic(prefix: &str, entity_id: &str) -> String {
    format!("{}/entities/{}/availability", prefix, entity_id)
}

pub fn result_topic(prefix: &str, entity_id: &str) -> String {
    format!("{}/entities/{}/result", prefix, entity_id)
}

pub fn command_filter(prefix: &str) -> String {
    format!("{}/entities/+/command", prefix)
}

/// Entity id from `{prefix}/entities/{id}/command`.
pub fn entity_from_command_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let id = topic
        .strip_prefix(prefix)?
        .strip_prefix("/entities/")?
        .strip_suffix("/command")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

/// Decode a command payload: an `EntityCommand` object that may also carry
/// a `request_id`.
pub fn parse_command_payload(payload: &[u8]) -> Result<(EntityCommand, Option<String>)> {
    let value: Value = serde_json::from_slice(payload)?;
    let request_id = value
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let command = serde_json::from_value(value)?;
    Ok((command, request_id))
}

/// Messages a bus event turns into; empty for events not bridged.
pub fn outbound_for(prefix: &str, event: &BusEvent) -> Result<Vec<Outbound>> {
    let messages = match event {
        BusEvent::EntityDiscovered { view } | BusEvent::EntityUpdated { view } => vec![
            Outbound {
                topic: state_topic(prefix, &view.unique_id),
                payload: serde_json::to_string(view)?,
                retain: true,
            },
            Outbound {
                topic: availability_topic(prefix, &view.unique_id),
                payload: (if view.available { ONLINE } else { OFFLINE }).to_string(),
                retain: true,
            },
        ],
        BusEvent::EntityUnavailable { entity_id, .. } => vec![Outbound {
            topic: availability_topic(prefix, entity_id),
            payload: OFFLINE.to_string(),
            retain: true,
        }],
        BusEvent::CommandResult {
            entity_id,
            outcome,
            request_id,
        } => {
            let mut payload = serde_json::to_value(outcome)?;
            if let (Some(map), Some(id)) = (payload.as_object_mut(), request_id) {
                map.insert("request_id".to_string(), Value::String(id.clone()));
            }
            vec![Outbound {
                topic: result_topic(prefix, entity_id),
                payload: payload.to_string(),
                retain: false,
            }]
        }
        _ => Vec::new(),
    };
    Ok(messages)
}

// =============================================================================
// Adapter
// =============================================================================

/// MQTT Adapter
pub struct MqttAdapter {
    config: Option<MqttConfig>,
    connected: Arc<RwLock<bool>>,
    client: RwLock<Option<AsyncClient>>,
    bus: SharedBus,
    shutdown: RwLock<CancellationToken>,
}

impl MqttAdapter {
    pub fn new(config: Option<MqttConfig>, bus: SharedBus) -> Self {
        Self {
            config,
            connected: Arc::new(RwLock::new(false)),
            client: RwLock::new(None),
            bus,
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    /// Check if configured
    pub async fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Get connection status
    pub async fn get_status(&self) -> MqttStatus {
        MqttStatus {
            connected: *self.connected.read().await,
            host: self.config.as_ref().map(|c| c.host.clone()),
            port: self.config.as_ref().map(|c| c.port),
            topic_prefix: self.config.as_ref().map(|c| c.topic_prefix.clone()),
        }
    }

    /// Connect and spawn the event loop and bus forwarder.
    async fn start_internal(&self) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| anyhow!("MQTT host not configured"))?;

        let prefix = config.topic_prefix.clone();
        let mut options = MqttOptions::new(CLIENT_ID, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            bridge_status_topic(&prefix),
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        *self.client.write().await = Some(client.clone());

        let shutdown = CancellationToken::new();
        *self.shutdown.write().await = shutdown.clone();

        info!("MQTT connecting to {}:{}...", config.host, config.port);

        tokio::spawn(Self::run_eventloop(
            eventloop,
            client.clone(),
            prefix.clone(),
            self.bus.clone(),
            self.connected.clone(),
            shutdown.clone(),
        ));
        // Subscribe before returning so discovery published right after start is bridged
        let rx = self.bus.subscribe();
        tokio::spawn(Self::forward_bus(client, prefix, rx, shutdown));

        Ok(())
    }

    async fn run_eventloop(
        mut eventloop: EventLoop,
        client: AsyncClient,
        prefix: String,
        bus: SharedBus,
        connected: Arc<RwLock<bool>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("MQTT event loop shutting down");
                    break;
                }
                result = eventloop.poll() => match result {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        info!("MQTT connected (code: {:?})", ack.code);
                        *connected.write().await = true;
                        // Clean sessions drop subscriptions, so renew them on every connect
                        if let Err(e) = client.try_subscribe(command_filter(&prefix), QoS::AtLeastOnce) {
                            warn!("MQTT subscribe failed: {}", e);
                        }
                        if let Err(e) = client.try_publish(bridge_status_topic(&prefix), QoS::AtLeastOnce, true, ONLINE) {
                            warn!("MQTT status publish failed: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        Self::handle_incoming(&prefix, &publish.topic, &publish.payload, &bus);
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        warn!("MQTT disconnected");
                        *connected.write().await = false;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {}", e);
                        *connected.write().await = false;
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        }
    }

    fn handle_incoming(prefix: &str, topic: &str, payload: &[u8], bus: &SharedBus) {
        let Some(entity_id) = entity_from_command_topic(prefix, topic) else {
            debug!("MQTT ignoring message on {}", topic);
            return;
        };

        match parse_command_payload(payload) {
            Ok((command, request_id)) => {
                debug!(entity = entity_id, ?command, "MQTT command received");
                bus.publish(BusEvent::CommandReceived {
                    entity_id: entity_id.to_string(),
                    command,
                    request_id,
                });
            }
            Err(e) => {
                warn!(entity = entity_id, "Invalid MQTT command payload: {}", e);
            }
        }
    }

    async fn forward_bus(
        client: AsyncClient,
        prefix: String,
        mut rx: broadcast::Receiver<BusEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("MQTT bus forwarder shutting down");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => {
                        let messages = match outbound_for(&prefix, &event) {
                            Ok(messages) => messages,
                            Err(e) => {
                                warn!("MQTT could not encode {}: {}", event.event_type(), e);
                                continue;
                            }
                        };
                        for msg in messages {
                            if let Err(e) = client
                                .publish(msg.topic, QoS::AtLeastOnce, msg.retain, msg.payload)
                                .await
                            {
                                warn!("MQTT publish failed: {}", e);
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("MQTT bus forwarder lagged, skipped {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stop MQTT connection
    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();

        let client = self.client.write().await.take();
        if let Some(client) = client {
            let _ = client.disconnect().await;
        }
        *self.connected.write().await = false;

        info!("MQTT adapter stopped");
    }
}

crate::impl_startable!(MqttAdapter, "mqtt", is_configured);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::entity::{CommandOutcome, EntityKey, MediaPlayerView};
    use crate::volume::VolumeLevel;
    use serde_json::json;

    #[test]
    fn test_command_topic_parsing() {
        assert_eq!(
            entity_from_command_topic("amplipi", "amplipi/entities/amplipi_zone_3/command"),
            Some("amplipi_zone_3")
        );
        assert_eq!(
            entity_from_command_topic("amplipi", "amplipi/entities/amplipi_zone_3/state"),
            None
        );
        assert_eq!(
            entity_from_command_topic("amplipi", "other/entities/amplipi_zone_3/command"),
            None
        );
        assert_eq!(
            entity_from_command_topic("amplipi", "amplipi/entities//command"),
            None
        );
    }

    #[test]
    fn test_command_payload_with_request_id() {
        let (command, request_id) = parse_command_payload(
            br#"{"command": "set_volume", "level": 0.4, "request_id": "r1"}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            EntityCommand::SetVolume {
                level: VolumeLevel::new(0.4).unwrap()
            }
        );
        assert_eq!(request_id.as_deref(), Some("r1"));

        let (command, request_id) = parse_command_payload(br#"{"command": "play"}"#).unwrap();
        assert_eq!(command, EntityCommand::Play);
        assert!(request_id.is_none());
    }

    #[test]
    fn test_invalid_command_payload_rejected() {
        assert!(parse_command_payload(b"not json").is_err());
        assert!(parse_command_payload(br#"{"command": "explode"}"#).is_err());
        assert!(parse_command_payload(br#"{"command": "set_volume", "level": 2}"#).is_err());
    }

    #[test]
    fn test_view_published_retained_with_availability() {
        let view = MediaPlayerView::unavailable(EntityKey::Zone(3), "Office");
        let messages =
            outbound_for("amplipi", &BusEvent::EntityUpdated { view: view.clone() }).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "amplipi/entities/amplipi_zone_3/state");
        assert!(messages[0].retain);
        let decoded: MediaPlayerView = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(decoded, view);
        assert_eq!(
            messages[1],
            Outbound {
                topic: "amplipi/entities/amplipi_zone_3/availability".to_string(),
                payload: "offline".to_string(),
                retain: true,
            }
        );
    }

    #[test]
    fn test_command_result_published() {
        let messages = outbound_for(
            "amplipi",
            &BusEvent::CommandResult {
                entity_id: "amplipi_source_0".to_string(),
                outcome: CommandOutcome::Ignored {
                    reason: "no stream".to_string(),
                },
                request_id: Some("r9".to_string()),
            },
        )
        .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "amplipi/entities/amplipi_source_0/result");
        assert!(!messages[0].retain);
        let payload: Value = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(
            payload,
            json!({"outcome": "ignored", "reason": "no stream", "request_id": "r9"})
        );
    }

    #[test]
    fn test_unbridged_events_produce_nothing() {
        let messages =
            outbound_for("amplipi", &BusEvent::ShuttingDown { reason: None }).unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_incoming_command_published_on_bus() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        MqttAdapter::handle_incoming(
            "amplipi",
            "amplipi/entities/amplipi_group_5/command",
            br#"{"command": "turn_off", "request_id": "x"}"#,
            &bus,
        );
        match rx.recv().await.unwrap() {
            BusEvent::CommandReceived {
                entity_id,
                command,
                request_id,
            } => {
                assert_eq!(entity_id, "amplipi_group_5");
                assert_eq!(command, EntityCommand::TurnOff);
                assert_eq!(request_id.as_deref(), Some("x"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_subscribes_before_returning() {
        use crate::adapters::Startable;
        let bus = Arc::new(EventBus::new(8));
        let config: MqttConfig =
            serde_json::from_value(json!({"host": "127.0.0.1", "port": 1})).unwrap();
        let adapter = MqttAdapter::new(Some(config), bus.clone());
        tokio_test::assert_ok!(adapter.start().await);
        assert_eq!(bus.subscriber_count(), 1);
        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_cannot_start() {
        use crate::adapters::Startable;
        let adapter = MqttAdapter::new(None, Arc::new(EventBus::new(8)));
        assert!(!adapter.can_start().await);
        tokio_test::assert_err!(adapter.start().await);
        assert!(!adapter.get_status().await.connected);
    }
}
