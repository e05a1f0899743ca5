//! Media-player entities
//!
//! Every source, zone and group on the controller is exposed as one entity
//! with a flattened, serialisable view. The view is rebuilt wholesale from a
//! snapshot by [`reconcile`]; user intents are translated into controller
//! calls by [`dispatch`]; [`MediaPlayer`] owns one view and serializes its
//! refreshes and commands.

pub mod dispatch;
pub mod player;
pub mod reconcile;

pub use dispatch::{execute, plan, ApiCall, DispatchPlan, Unresolvable};
pub use player::MediaPlayer;
pub use reconcile::reconcile;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::amplipi::StreamCommand;
use crate::volume::{VolumeLevel, VolumeRange};

const UNIQUE_ID_PREFIX: &str = "amplipi";

// =============================================================================
// EntityKey
// =============================================================================

/// Identity of an entity: which controller record it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Source(u32),
    Zone(u32),
    Group(u32),
}

impl EntityKey {
    pub fn id(&self) -> u32 {
        match self {
            Self::Source(id) | Self::Zone(id) | Self::Group(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Zone(_) => "zone",
            Self::Group(_) => "group",
        }
    }

    /// Stable unique id, e.g. `amplipi_zone_3`.
    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}", UNIQUE_ID_PREFIX, self.kind(), self.id())
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(UNIQUE_ID_PREFIX)?.strip_prefix('_')?;
        let (kind, id) = rest.split_once('_')?;
        let id: u32 = id.parse().ok()?;
        match kind {
            "source" => Some(Self::Source(id)),
            "zone" => Some(Self::Zone(id)),
            "group" => Some(Self::Group(id)),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_id())
    }
}

impl FromStr for EntityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid entity id: {}", s))
    }
}

impl Serialize for EntityKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.unique_id())
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// View model
// =============================================================================

/// Displayed state of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Off,
    On,
    Idle,
    Playing,
    Paused,
    #[default]
    Unknown,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Idle => write!(f, "idle"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Capability bitset. Bit values match Home Assistant's media player
/// feature flags so the number can be handed to it unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportedFeatures(u32);

impl SupportedFeatures {
    pub const PAUSE: Self = Self(1);
    pub const VOLUME_SET: Self = Self(4);
    pub const VOLUME_MUTE: Self = Self(8);
    pub const PREVIOUS_TRACK: Self = Self(16);
    pub const NEXT_TRACK: Self = Self(32);
    pub const TURN_ON: Self = Self(128);
    pub const TURN_OFF: Self = Self(256);
    pub const PLAY_MEDIA: Self = Self(512);
    pub const VOLUME_STEP: Self = Self(1024);
    pub const SELECT_SOURCE: Self = Self(2048);
    pub const STOP: Self = Self(4096);
    pub const PLAY: Self = Self(16384);
    pub const BROWSE_MEDIA: Self = Self(131072);

    /// Baseline when a stream advertises nothing.
    pub const DEFAULT: Self =
        Self(Self::SELECT_SOURCE.0 | Self::VOLUME_SET.0 | Self::VOLUME_MUTE.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Feature bit for a transport command.
    pub fn for_stream_command(command: StreamCommand) -> Self {
        match command {
            StreamCommand::Play => Self::PLAY,
            StreamCommand::Pause => Self::PAUSE,
            StreamCommand::Stop => Self::STOP,
            StreamCommand::Next => Self::NEXT_TRACK,
            StreamCommand::Previous => Self::PREVIOUS_TRACK,
        }
    }
}

impl BitOr for SupportedFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SupportedFeatures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub station: Option<String>,
    pub artwork_url: Option<String>,
}

/// Everything the hosting framework needs to render one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlayerView {
    pub key: EntityKey,
    pub unique_id: String,
    pub name: String,
    pub state: PlayerState,
    pub enabled: Option<bool>,
    /// Normalized level in `[0.0, 1.0]`, `None` when unknown.
    pub volume_level: Option<f64>,
    pub muted: Option<bool>,
    /// Current selection, one of `source_list`.
    pub source: Option<String>,
    pub source_list: Vec<String>,
    pub now_playing: NowPlaying,
    pub supported_features: SupportedFeatures,
    pub available: bool,
}

impl MediaPlayerView {
    /// View for an entity whose state cannot currently be determined.
    pub fn unavailable(key: EntityKey, name: impl Into<String>) -> Self {
        Self {
            key,
            unique_id: key.unique_id(),
            name: name.into(),
            state: PlayerState::Unknown,
            enabled: None,
            volume_level: None,
            muted: None,
            source: None,
            source_list: Vec::new(),
            now_playing: NowPlaying::default(),
            supported_features: SupportedFeatures::empty(),
            available: false,
        }
    }
}

/// Settings the reconciler and dispatcher need besides the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileContext {
    /// Fallback native range for records without their own bounds.
    pub volume_range: VolumeRange,
    /// Prefix for relative artwork URLs.
    pub artwork_base: String,
    /// Controller display name, used for unnamed sources.
    pub controller_name: String,
    /// Normalized increment for volume up/down.
    pub volume_step: f64,
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self {
            volume_range: VolumeRange::default(),
            artwork_base: String::new(),
            controller_name: "AmpliPi".to_string(),
            volume_step: 0.05,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub media: String,
    #[serde(default)]
    pub volume: Option<VolumeLevel>,
}

/// A user intent against one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetVolume(VolumeLevel),
    VolumeStep(StepDirection),
    Mute(bool),
    SelectSource(String),
    Transport(StreamCommand),
    Power(bool),
    Announce(AnnounceRequest),
    PlayMedia(String),
}

/// Wire form of an intent, as received over HTTP or MQTT.
///
/// ```json
/// {"command": "set_volume", "level": 0.5}
/// {"command": "select_source", "source": "Groove Salad"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EntityCommand {
    SetVolume { level: VolumeLevel },
    VolumeUp,
    VolumeDown,
    Mute { muted: bool },
    SelectSource { source: String },
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    TurnOn,
    TurnOff,
    Announce {
        media: String,
        #[serde(default)]
        volume: Option<VolumeLevel>,
    },
    PlayMedia { media_id: String },
}

impl From<EntityCommand> for Intent {
    fn from(command: EntityCommand) -> Self {
        match command {
            EntityCommand::SetVolume { level } => Intent::SetVolume(level),
            EntityCommand::VolumeUp => Intent::VolumeStep(StepDirection::Up),
            EntityCommand::VolumeDown => Intent::VolumeStep(StepDirection::Down),
            EntityCommand::Mute { muted } => Intent::Mute(muted),
            EntityCommand::SelectSource { source } => Intent::SelectSource(source),
            EntityCommand::Play => Intent::Transport(StreamCommand::Play),
            EntityCommand::Pause => Intent::Transport(StreamCommand::Pause),
            EntityCommand::Stop => Intent::Transport(StreamCommand::Stop),
            EntityCommand::NextTrack => Intent::Transport(StreamCommand::Next),
            EntityCommand::PreviousTrack => Intent::Transport(StreamCommand::Previous),
            EntityCommand::TurnOn => Intent::Power(true),
            EntityCommand::TurnOff => Intent::Power(false),
            EntityCommand::Announce { media, volume } => {
                Intent::Announce(AnnounceRequest { media, volume })
            }
            EntityCommand::PlayMedia { media_id } => Intent::PlayMedia(media_id),
        }
    }
}

/// Result of one command against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Dispatched; the entity has re-synchronized since.
    Applied,
    /// Could not be resolved against current state; nothing was sent.
    Ignored { reason: String },
    /// The controller could not be reached or rejected the call.
    Failed { error: String },
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_unique_ids() {
        assert_eq!(EntityKey::Source(0).unique_id(), "amplipi_source_0");
        assert_eq!(EntityKey::Zone(12).unique_id(), "amplipi_zone_12");
        assert_eq!(EntityKey::Group(101).to_string(), "amplipi_group_101");
    }

    #[test]
    fn test_entity_key_parse() {
        assert_eq!(EntityKey::parse("amplipi_zone_3"), Some(EntityKey::Zone(3)));
        assert_eq!(
            "amplipi_group_7".parse::<EntityKey>(),
            Ok(EntityKey::Group(7))
        );
        assert_eq!(EntityKey::parse("amplipi_stream_1"), None);
        assert_eq!(EntityKey::parse("other_zone_1"), None);
        assert_eq!(EntityKey::parse("amplipi_zone_x"), None);
    }

    #[test]
    fn test_entity_key_serializes_as_unique_id() {
        let json = serde_json::to_value(EntityKey::Zone(4)).unwrap();
        assert_eq!(json, json!("amplipi_zone_4"));
        let key: EntityKey = serde_json::from_value(json!("amplipi_source_2")).unwrap();
        assert_eq!(key, EntityKey::Source(2));
    }

    #[test]
    fn test_supported_features_bits() {
        let features = SupportedFeatures::DEFAULT | SupportedFeatures::PLAY;
        assert!(features.contains(SupportedFeatures::SELECT_SOURCE));
        assert!(features.contains(SupportedFeatures::PLAY));
        assert!(!features.contains(SupportedFeatures::PAUSE));
        assert_eq!(SupportedFeatures::DEFAULT.bits(), 2048 | 4 | 8);
        assert_eq!(serde_json::to_value(features).unwrap(), json!(2048 | 4 | 8 | 16384));
    }

    #[test]
    fn test_entity_command_wire_format() {
        let cmd: EntityCommand =
            serde_json::from_value(json!({"command": "set_volume", "level": 0.5})).unwrap();
        assert_eq!(
            Intent::from(cmd),
            Intent::SetVolume(VolumeLevel::new(0.5).unwrap())
        );

        let cmd: EntityCommand =
            serde_json::from_value(json!({"command": "previous_track"})).unwrap();
        assert_eq!(Intent::from(cmd), Intent::Transport(StreamCommand::Previous));

        let cmd: EntityCommand = serde_json::from_value(
            json!({"command": "announce", "media": "http://example.com/ding.mp3"}),
        )
        .unwrap();
        assert!(matches!(Intent::from(cmd), Intent::Announce(AnnounceRequest { volume: None, .. })));
    }

    #[test]
    fn test_entity_command_rejects_out_of_range_volume() {
        let result =
            serde_json::from_value::<EntityCommand>(json!({"command": "set_volume", "level": 1.5}));
        assert!(result.is_err());
    }

    #[test]
    fn test_command_outcome_serialization() {
        let json = serde_json::to_value(CommandOutcome::Ignored {
            reason: "no stream".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({"outcome": "ignored", "reason": "no stream"}));
        assert_eq!(
            serde_json::to_value(CommandOutcome::Applied).unwrap(),
            json!({"outcome": "applied"})
        );
    }
}
