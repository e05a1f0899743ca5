//! Snapshot → view reconciliation
//!
//! Pure functions of `(snapshot, key, context)`. The same inputs always give
//! the same view, so applying one snapshot twice is a no-op.
//!
//! Volume and mute resolve in a fixed order: the entity's own record, then
//! the first associated group with a value, then the first associated zone
//! with a value, else unknown. "Associated" means:
//!
//! - source: zones and groups whose `source_id` is the source
//! - zone: groups containing the zone, then the other members of those groups
//! - group: its member zones

use tracing::warn;

use super::{
    EntityKey, MediaPlayerView, NowPlaying, PlayerState, ReconcileContext, SupportedFeatures,
};
use crate::amplipi::{Group, InputDescriptor, Source, SourceInfo, StreamCommand, Zone};
use crate::media::resolve_artwork_url;
use crate::snapshot::Snapshot;
use crate::volume::{record_level, VolumeRange};

/// Selection labels offered on source entities besides stream names.
pub const LOCAL_INPUT_LABEL: &str = "Local";
pub const NO_INPUT_LABEL: &str = "None";

/// Features every entity supports regardless of stream: the minimal set
/// (source select, volume, mute) plus on/off, volume step, play media and
/// browse, which every entity accepts through zone power and stream selection.
const COMMON_FEATURES: SupportedFeatures = SupportedFeatures(
    SupportedFeatures::DEFAULT.bits()
        | SupportedFeatures::VOLUME_STEP.bits()
        | SupportedFeatures::PLAY_MEDIA.bits()
        | SupportedFeatures::BROWSE_MEDIA.bits()
        | SupportedFeatures::TURN_ON.bits()
        | SupportedFeatures::TURN_OFF.bits(),
);

/// Rebuild the view for `key`. `None` means the record is missing from the
/// snapshot (stale entity).
pub fn reconcile(
    snapshot: &Snapshot,
    key: EntityKey,
    ctx: &ReconcileContext,
) -> Option<MediaPlayerView> {
    match key {
        EntityKey::Source(id) => snapshot.source(id).map(|s| source_view(snapshot, s, ctx)),
        EntityKey::Zone(id) => snapshot.zone(id).map(|z| zone_view(snapshot, z, ctx)),
        EntityKey::Group(id) => snapshot.group(id).map(|g| group_view(snapshot, g, ctx)),
    }
}

/// Display name for a key as it would appear in `snapshot`, with fallbacks
/// for unnamed or missing records.
pub fn entity_name(snapshot: &Snapshot, key: EntityKey, ctx: &ReconcileContext) -> String {
    let named = match key {
        EntityKey::Source(id) => snapshot.source(id).map(|s| s.name.as_str()),
        EntityKey::Zone(id) => snapshot.zone(id).map(|z| z.name.as_str()),
        EntityKey::Group(id) => snapshot.group(id).map(|g| g.name.as_str()),
    };
    match named.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => fallback_name(key, ctx),
    }
}

fn fallback_name(key: EntityKey, ctx: &ReconcileContext) -> String {
    match key {
        EntityKey::Source(id) => format!("{} Input {}", ctx.controller_name, id),
        EntityKey::Zone(id) => format!("Zone {}", id),
        EntityKey::Group(id) => format!("Group {}", id),
    }
}

/// Name under which a source is offered to zones and groups.
pub fn source_label(source: &Source, ctx: &ReconcileContext) -> String {
    let name = source.name.trim();
    if name.is_empty() {
        fallback_name(EntityKey::Source(source.id), ctx)
    } else {
        name.to_string()
    }
}

/// Fixed ranking: no info → idle, "paused", "playing", "stopped" → idle,
/// anything else → idle.
pub fn playback_state(info: Option<&SourceInfo>) -> PlayerState {
    match info.and_then(|i| i.state.as_deref()) {
        Some("paused") => PlayerState::Paused,
        Some("playing") => PlayerState::Playing,
        // "stopped", unrecognised states and missing info
        _ => PlayerState::Idle,
    }
}

/// Transport bits advertised by a source's stream.
pub fn transport_features(info: Option<&SourceInfo>) -> SupportedFeatures {
    let mut features = SupportedFeatures::empty();
    if let Some(cmds) = info.and_then(|i| i.supported_cmds.as_ref()) {
        for cmd in cmds.iter().filter_map(|c| StreamCommand::from_advertised(c)) {
            features |= SupportedFeatures::for_stream_command(cmd);
        }
    }
    features
}

fn now_playing(info: Option<&SourceInfo>, ctx: &ReconcileContext) -> NowPlaying {
    let Some(info) = info else {
        return NowPlaying::default();
    };
    NowPlaying {
        title: info.track.clone(),
        artist: info.artist.clone(),
        album: info.album.clone(),
        station: info.station.clone(),
        artwork_url: resolve_artwork_url(&ctx.artwork_base, info.img_url.as_deref()),
    }
}

fn zone_range(zone: &Zone, ctx: &ReconcileContext) -> VolumeRange {
    ctx.volume_range.with_overrides(zone.vol_min, zone.vol_max)
}

fn zone_level(zone: &Zone, ctx: &ReconcileContext) -> Option<f64> {
    record_level(zone.vol, zone.vol_f, zone_range(zone, ctx))
}

fn group_level(group: &Group, ctx: &ReconcileContext) -> Option<f64> {
    record_level(group.vol_delta, group.vol_f, ctx.volume_range)
}

fn source_level(source: &Source, ctx: &ReconcileContext) -> Option<f64> {
    record_level(source.vol, source.vol_f, ctx.volume_range)
}

/// Resolve volume and mute through the fallback order.
fn resolve_volume_mute<'a>(
    own: (Option<f64>, Option<bool>),
    groups: impl Iterator<Item = &'a Group> + Clone,
    zones: impl Iterator<Item = &'a Zone> + Clone,
    ctx: &ReconcileContext,
) -> (Option<f64>, Option<bool>) {
    let level = own
        .0
        .or_else(|| groups.clone().find_map(|g| group_level(g, ctx)))
        .or_else(|| zones.clone().find_map(|z| zone_level(z, ctx)));
    let muted = own
        .1
        .or_else(|| groups.clone().find_map(|g| g.mute))
        .or_else(|| zones.clone().find_map(|z| z.mute));
    (level, muted)
}

/// Selectable inputs for a source entity: stream names plus local and none.
fn source_input_list(snapshot: &Snapshot) -> Vec<String> {
    let mut list: Vec<String> = snapshot.streams().iter().map(|s| s.name.clone()).collect();
    list.push(LOCAL_INPUT_LABEL.to_string());
    list.push(NO_INPUT_LABEL.to_string());
    list
}

/// Selectable sources for a zone or group entity.
fn zone_source_list(snapshot: &Snapshot, ctx: &ReconcileContext) -> Vec<String> {
    snapshot
        .sources()
        .iter()
        .map(|s| source_label(s, ctx))
        .collect()
}

fn current_input_label(snapshot: &Snapshot, source: &Source) -> Option<String> {
    match source.input_descriptor() {
        InputDescriptor::Local => Some(LOCAL_INPUT_LABEL.to_string()),
        InputDescriptor::None => Some(NO_INPUT_LABEL.to_string()),
        InputDescriptor::Stream(id) => match snapshot.stream(id) {
            Some(stream) => Some(stream.name.clone()),
            None => {
                warn!(source_id = source.id, stream_id = id, "Source references unknown stream");
                None
            }
        },
        InputDescriptor::Unknown(raw) => {
            warn!(source_id = source.id, input = %raw, "Unrecognised source input");
            None
        }
    }
}

fn source_view(snapshot: &Snapshot, source: &Source, ctx: &ReconcileContext) -> MediaPlayerView {
    let key = EntityKey::Source(source.id);
    let info = source.info.as_ref();

    let (volume_level, muted) = resolve_volume_mute(
        (source_level(source, ctx), source.mute),
        snapshot.groups_for_source(source.id),
        snapshot.zones_for_source(source.id),
        ctx,
    );

    let enabled = snapshot.zones_for_source(source.id).any(|z| !z.disabled)
        || snapshot
            .groups_for_source(source.id)
            .any(|g| snapshot.member_zones(g).any(|z| !z.disabled));

    MediaPlayerView {
        key,
        unique_id: key.unique_id(),
        name: entity_name(snapshot, key, ctx),
        state: playback_state(info),
        enabled: Some(enabled),
        volume_level,
        muted,
        source: current_input_label(snapshot, source),
        source_list: source_input_list(snapshot),
        now_playing: now_playing(info, ctx),
        supported_features: COMMON_FEATURES | transport_features(info),
        available: true,
    }
}

/// Playback-derived parts of a zone or group view, taken from the bound
/// source.
struct Inherited {
    state: PlayerState,
    source: Option<String>,
    now_playing: NowPlaying,
    transport: SupportedFeatures,
}

fn inherit_from_source(
    snapshot: &Snapshot,
    key: EntityKey,
    source_id: Option<u32>,
    enabled: bool,
    ctx: &ReconcileContext,
) -> Inherited {
    let bound = source_id.and_then(|id| {
        let source = snapshot.source(id);
        if source.is_none() {
            warn!(entity = %key, source_id = id, "Bound source missing from snapshot");
        }
        source
    });

    match bound {
        Some(source) => {
            let info = source.info.as_ref();
            Inherited {
                state: if enabled {
                    playback_state(info)
                } else {
                    PlayerState::Off
                },
                source: Some(source_label(source, ctx)),
                now_playing: now_playing(info, ctx),
                transport: transport_features(info),
            }
        }
        None => Inherited {
            state: if enabled {
                PlayerState::On
            } else {
                PlayerState::Off
            },
            source: None,
            now_playing: NowPlaying::default(),
            transport: SupportedFeatures::empty(),
        },
    }
}

fn zone_view(snapshot: &Snapshot, zone: &Zone, ctx: &ReconcileContext) -> MediaPlayerView {
    let key = EntityKey::Zone(zone.id);
    let enabled = !zone.disabled;

    let groups = snapshot.groups_containing_zone(zone.id);
    let siblings = snapshot
        .groups_containing_zone(zone.id)
        .flat_map(|g| g.zones.iter().copied())
        .filter(move |id| *id != zone.id)
        .filter_map(|id| snapshot.zone(id));

    let (volume_level, muted) =
        resolve_volume_mute((zone_level(zone, ctx), zone.mute), groups, siblings, ctx);

    let inherited = inherit_from_source(snapshot, key, zone.source_id, enabled, ctx);

    MediaPlayerView {
        key,
        unique_id: key.unique_id(),
        name: entity_name(snapshot, key, ctx),
        state: inherited.state,
        enabled: Some(enabled),
        volume_level,
        muted,
        source: inherited.source,
        source_list: zone_source_list(snapshot, ctx),
        now_playing: inherited.now_playing,
        supported_features: COMMON_FEATURES | inherited.transport,
        available: true,
    }
}

fn group_view(snapshot: &Snapshot, group: &Group, ctx: &ReconcileContext) -> MediaPlayerView {
    let key = EntityKey::Group(group.id);
    let enabled = snapshot.member_zones(group).any(|z| !z.disabled);

    let (volume_level, muted) = resolve_volume_mute(
        (group_level(group, ctx), group.mute),
        std::iter::empty(),
        snapshot.member_zones(group),
        ctx,
    );

    let inherited = inherit_from_source(snapshot, key, group.source_id, enabled, ctx);

    MediaPlayerView {
        key,
        unique_id: key.unique_id(),
        name: entity_name(snapshot, key, ctx),
        state: inherited.state,
        enabled: Some(enabled),
        volume_level,
        muted,
        source: inherited.source,
        source_list: zone_source_list(snapshot, ctx),
        now_playing: inherited.now_playing,
        supported_features: COMMON_FEATURES | inherited.transport,
        available: true,
    }
}
