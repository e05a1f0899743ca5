//! Event types carried on the bus.
//!
//! Entities are identified by their unique id (`amplipi_zone_3`) so that
//! consumers outside the crate (MQTT, SSE) can route without knowing about
//! [`EntityKey`](crate::entity::EntityKey).

use serde::{Deserialize, Serialize};

use crate::entity::{CommandOutcome, EntityCommand, MediaPlayerView};

/// Events published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // =========================================================================
    // Entity Events
    // =========================================================================
    /// Entity registered at setup
    EntityDiscovered { view: MediaPlayerView },

    /// The reconciled view of an entity changed
    EntityUpdated { view: MediaPlayerView },

    /// An entity's state can no longer be determined
    EntityUnavailable { entity_id: String, reason: String },

    // =========================================================================
    // Command Events
    // =========================================================================
    /// A command arrived from an external surface
    CommandReceived {
        entity_id: String,
        command: EntityCommand,
        /// Optional request ID for correlation
        request_id: Option<String>,
    },

    /// Result of a command execution
    CommandResult {
        entity_id: String,
        outcome: CommandOutcome,
        /// Request ID for correlation (if provided in CommandReceived)
        request_id: Option<String>,
    },

    // =========================================================================
    // Controller / Adapter Lifecycle
    // =========================================================================
    ControllerConnected { base_url: String },

    ControllerDisconnected { reason: String },

    /// An adapter has fully stopped
    AdapterStopped { adapter: String },

    // =========================================================================
    // System Events
    // =========================================================================
    /// System is shutting down
    ShuttingDown { reason: Option<String> },
}

impl BusEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EntityDiscovered { .. } => "entity_discovered",
            Self::EntityUpdated { .. } => "entity_updated",
            Self::EntityUnavailable { .. } => "entity_unavailable",
            Self::CommandReceived { .. } => "command_received",
            Self::CommandResult { .. } => "command_result",
            Self::ControllerConnected { .. } => "controller_connected",
            Self::ControllerDisconnected { .. } => "controller_disconnected",
            Self::AdapterStopped { .. } => "adapter_stopped",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }

    /// Unique id of the entity this event concerns, if any.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::EntityDiscovered { view } | Self::EntityUpdated { view } => {
                Some(&view.unique_id)
            }
            Self::EntityUnavailable { entity_id, .. }
            | Self::CommandReceived { entity_id, .. }
            | Self::CommandResult { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    /// Check if this is an entity state event
    pub fn is_entity_event(&self) -> bool {
        matches!(
            self,
            Self::EntityDiscovered { .. }
                | Self::EntityUpdated { .. }
                | Self::EntityUnavailable { .. }
        )
    }

    /// Check if this is a command-related event
    pub fn is_command_event(&self) -> bool {
        matches!(
            self,
            Self::CommandReceived { .. } | Self::CommandResult { .. }
        )
    }
}
