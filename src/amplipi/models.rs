//! Wire types for the AmpliPi REST API.
//!
//! Read types mirror the controller's `GET /api/` status document. Every
//! field the controller may omit is optional so that older firmware (and
//! half-configured controllers) still deserialize. Write types are one struct
//! per command kind; absent fields are never serialized, so an update only
//! touches what it names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::volume::VolumeLevel;

// =============================================================================
// Status (read side)
// =============================================================================

/// Full controller state returned by a single `GET /api/` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub info: Option<ControllerInfo>,
}

/// Controller firmware details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub mock_ctrl: Option<bool>,
    #[serde(default)]
    pub mock_streams: Option<bool>,
}

/// A logical audio input feeding zero or more zones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Raw input descriptor (`local`, `none`, `stream=<id>`, or legacy values).
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub mute: Option<bool>,
    /// Native volume offset in dB (older firmware calls this `vol_delta`).
    #[serde(default, alias = "vol_delta")]
    pub vol: Option<f64>,
    #[serde(default)]
    pub vol_f: Option<f64>,
    /// Playback info; absent when no stream is active.
    #[serde(default)]
    pub info: Option<SourceInfo>,
}

impl Source {
    /// Parse the raw input string into a typed descriptor.
    pub fn input_descriptor(&self) -> InputDescriptor {
        InputDescriptor::from(self.input.as_str())
    }
}

/// Now-playing information published by the stream bound to a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
    /// Transport commands the stream advertises (`play`, `pause`, `next`, ...).
    #[serde(default)]
    pub supported_cmds: Option<Vec<String>>,
}

/// A single physical output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_id: Option<u32>,
    #[serde(default)]
    pub mute: Option<bool>,
    /// Native volume in dB.
    #[serde(default)]
    pub vol: Option<f64>,
    #[serde(default)]
    pub vol_f: Option<f64>,
    #[serde(default)]
    pub vol_min: Option<f64>,
    #[serde(default)]
    pub vol_max: Option<f64>,
    #[serde(default)]
    pub disabled: bool,
}

/// A named collection of zones controlled together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_id: Option<u32>,
    #[serde(default)]
    pub zones: Vec<u32>,
    #[serde(default)]
    pub mute: Option<bool>,
    /// Native volume in dB, relative to member zones.
    #[serde(default)]
    pub vol_delta: Option<f64>,
    #[serde(default)]
    pub vol_f: Option<f64>,
}

/// A configured streaming service instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub stream_type: String,
}

// =============================================================================
// Input descriptor
// =============================================================================

const STREAM_INPUT_PREFIX: &str = "stream=";

/// Typed form of a source's `input` string.
///
/// Parsing never fails: anything unrecognised is kept verbatim as `Unknown`
/// so that a dangling or malformed reference degrades to "no stream" instead
/// of breaking reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputDescriptor {
    /// The source's local (RCA) input.
    Local,
    /// Nothing connected.
    None,
    /// A stream, by stream id.
    Stream(u32),
    /// Unrecognised value as received from the controller.
    Unknown(String),
}

impl InputDescriptor {
    /// Stream id, if this descriptor references a stream.
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Self::Stream(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for InputDescriptor {
    fn from(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "local" => Self::Local,
            "" | "none" => Self::None,
            _ => match trimmed.strip_prefix(STREAM_INPUT_PREFIX) {
                Some(id) => id
                    .parse()
                    .map(Self::Stream)
                    .unwrap_or_else(|_| Self::Unknown(raw.to_string())),
                None => Self::Unknown(raw.to_string()),
            },
        }
    }
}

impl From<String> for InputDescriptor {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<InputDescriptor> for String {
    fn from(input: InputDescriptor) -> Self {
        input.to_string()
    }
}

impl FromStr for InputDescriptor {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for InputDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::None => write!(f, "none"),
            Self::Stream(id) => write!(f, "{}{}", STREAM_INPUT_PREFIX, id),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

// =============================================================================
// Updates (write side)
// =============================================================================

/// Partial update for a single zone (`PATCH /zones/{id}`), also the payload
/// of a multi-target update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vol_f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl ZoneUpdate {
    pub fn mute(mute: bool) -> Self {
        Self {
            mute: Some(mute),
            ..Default::default()
        }
    }

    /// Native volume in dB; callers convert and clamp before building this.
    pub fn native_volume(db: f64) -> Self {
        Self {
            vol: Some(db),
            ..Default::default()
        }
    }

    pub fn level(level: VolumeLevel) -> Self {
        Self {
            vol_f: Some(level.get()),
            ..Default::default()
        }
    }

    pub fn disabled(disabled: bool) -> Self {
        Self {
            disabled: Some(disabled),
            ..Default::default()
        }
    }

    pub fn source(source_id: u32) -> Self {
        Self {
            source_id: Some(source_id),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One update applied atomically to a set of zones and groups (`PATCH /zones`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiZoneUpdate {
    #[serde(default)]
    pub zones: Vec<u32>,
    #[serde(default)]
    pub groups: Vec<u32>,
    pub update: ZoneUpdate,
}

impl MultiZoneUpdate {
    /// Build a multi-target update; ids are sorted and de-duplicated.
    pub fn new(
        zones: impl IntoIterator<Item = u32>,
        groups: impl IntoIterator<Item = u32>,
        update: ZoneUpdate,
    ) -> Self {
        let mut zones: Vec<u32> = zones.into_iter().collect();
        zones.sort_unstable();
        zones.dedup();
        let mut groups: Vec<u32> = groups.into_iter().collect();
        groups.sort_unstable();
        groups.dedup();
        Self {
            zones,
            groups,
            update,
        }
    }

    /// True when the update names no targets.
    pub fn has_no_targets(&self) -> bool {
        self.zones.is_empty() && self.groups.is_empty()
    }
}

/// Partial update for a source (`PATCH /sources/{id}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputDescriptor>,
}

impl SourceUpdate {
    pub fn input(input: InputDescriptor) -> Self {
        Self {
            input: Some(input),
            ..Default::default()
        }
    }
}

/// Partial update for a group (`PATCH /groups/{id}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vol_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vol_f: Option<f64>,
}

impl GroupUpdate {
    pub fn mute(mute: bool) -> Self {
        Self {
            mute: Some(mute),
            ..Default::default()
        }
    }

    pub fn level(level: VolumeLevel) -> Self {
        Self {
            vol_f: Some(level.get()),
            ..Default::default()
        }
    }

    pub fn source(source_id: u32) -> Self {
        Self {
            source_id: Some(source_id),
            ..Default::default()
        }
    }
}

/// Transient announcement played over a source (`POST /announce`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vol_f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
}

impl Announcement {
    /// Media must already be validated; see [`crate::media::validate_media_url`].
    pub fn new(media: &url::Url, level: Option<VolumeLevel>, source_id: u32) -> Self {
        Self {
            media: media.to_string(),
            vol_f: level.map(VolumeLevel::get),
            source_id: Some(source_id),
        }
    }
}

/// Transport commands accepted by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamCommand {
    Play,
    Pause,
    Stop,
    Next,
    #[serde(alias = "prev")]
    Previous,
}

impl StreamCommand {
    /// Path segment used by `POST /streams/{id}/{cmd}`.
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Next => "next",
            Self::Previous => "prev",
        }
    }

    /// Command name as advertised in a stream's `supported_cmds`.
    pub fn from_advertised(cmd: &str) -> Option<Self> {
        match cmd {
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "stop" => Some(Self::Stop),
            "next" => Some(Self::Next),
            "prev" | "previous" => Some(Self::Previous),
            _ => None,
        }
    }
}

impl fmt::Display for StreamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}
