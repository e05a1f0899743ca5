//! Intent → controller calls
//!
//! Planning is pure and works against the snapshot fetched just before the
//! command. Anything that cannot be resolved against that snapshot becomes
//! an [`Unresolvable`] and nothing is sent.
//!
//! Scoping rules:
//!
//! | Intent                   | Source entity                 | Zone          | Group               |
//! |--------------------------|-------------------------------|---------------|---------------------|
//! | volume / mute            | one multi-update, bound zones+groups | zone update | group update  |
//! | power                    | one multi-update, bound zones+groups | zone update | one multi-update, member zones |
//! | select source            | source input                  | zone source   | group source        |
//! | transport                | current stream of the source  | of bound source | of bound source   |
//! | announce                 | the source                    | bound source  | bound source        |

use thiserror::Error;
use tracing::debug;

use super::reconcile::{reconcile, source_label, LOCAL_INPUT_LABEL, NO_INPUT_LABEL};
use super::{AnnounceRequest, EntityKey, Intent, ReconcileContext, StepDirection};
use crate::amplipi::{
    AmpliPiApi, Announcement, ApiError, GroupUpdate, InputDescriptor, MultiZoneUpdate, Source,
    SourceUpdate, StreamCommand, ZoneUpdate,
};
use crate::media::{validate_media_url, MediaError};
use crate::snapshot::Snapshot;
use crate::volume::{level_to_db, VolumeLevel};

/// Why an intent could not be turned into controller calls.
#[derive(Debug, Error, PartialEq)]
pub enum Unresolvable {
    #[error("{0} is not present on the controller")]
    MissingEntity(EntityKey),

    #[error("source {0} has no zones or groups bound to it")]
    NoTargets(u32),

    #[error("group {0} has no member zones")]
    EmptyGroup(u32),

    #[error("{0} is not bound to a source")]
    NoSource(EntityKey),

    #[error("source {0} is not playing a stream")]
    NoStream(u32),

    #[error("'{0}' does not name a selectable source")]
    UnknownSelection(String),

    #[error("'{0}' is neither a stream name nor a media URL")]
    UnknownMedia(String),

    #[error("current volume of {0} is unknown")]
    UnknownVolume(EntityKey),

    #[error(transparent)]
    InvalidMedia(#[from] MediaError),
}

/// One controller call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    SetZone { zone_id: u32, update: ZoneUpdate },
    SetZones(MultiZoneUpdate),
    SetSource { source_id: u32, update: SourceUpdate },
    SetGroup { group_id: u32, update: GroupUpdate },
    Stream { stream_id: u32, command: StreamCommand },
    Announce(Announcement),
}

/// Calls to issue for one intent, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub key: EntityKey,
    pub calls: Vec<ApiCall>,
}

impl DispatchPlan {
    fn single(key: EntityKey, call: ApiCall) -> Self {
        Self {
            key,
            calls: vec![call],
        }
    }
}

/// Translate `intent` on `key` into controller calls.
pub fn plan(
    snapshot: &Snapshot,
    key: EntityKey,
    intent: &Intent,
    ctx: &ReconcileContext,
) -> Result<DispatchPlan, Unresolvable> {
    ensure_present(snapshot, key)?;

    let call = match intent {
        Intent::SetVolume(level) => set_volume(snapshot, key, *level, ctx)?,
        Intent::VolumeStep(direction) => {
            let current = reconcile(snapshot, key, ctx)
                .and_then(|view| view.volume_level)
                .ok_or(Unresolvable::UnknownVolume(key))?;
            let delta = match direction {
                StepDirection::Up => ctx.volume_step,
                StepDirection::Down => -ctx.volume_step,
            };
            set_volume(snapshot, key, VolumeLevel::saturating(current + delta), ctx)?
        }
        Intent::Mute(mute) => match key {
            EntityKey::Zone(zone_id) => ApiCall::SetZone {
                zone_id,
                update: ZoneUpdate::mute(*mute),
            },
            EntityKey::Group(group_id) => ApiCall::SetGroup {
                group_id,
                update: GroupUpdate::mute(*mute),
            },
            EntityKey::Source(source_id) => {
                fan_out(snapshot, source_id, ZoneUpdate::mute(*mute))?
            }
        },
        Intent::Power(on) => {
            let update = ZoneUpdate::disabled(!on);
            match key {
                EntityKey::Zone(zone_id) => ApiCall::SetZone { zone_id, update },
                EntityKey::Group(group_id) => {
                    let members: Vec<u32> = snapshot
                        .group(group_id)
                        .map(|g| snapshot.member_zones(g).map(|z| z.id).collect())
                        .unwrap_or_default();
                    if members.is_empty() {
                        return Err(Unresolvable::EmptyGroup(group_id));
                    }
                    ApiCall::SetZones(MultiZoneUpdate::new(members, [], update))
                }
                EntityKey::Source(source_id) => fan_out(snapshot, source_id, update)?,
            }
        }
        Intent::SelectSource(name) => select_source(snapshot, key, name, ctx)?,
        Intent::Transport(command) => {
            let source = bound_source(snapshot, key)?;
            let stream = snapshot
                .current_stream(source)
                .ok_or(Unresolvable::NoStream(source.id))?;
            ApiCall::Stream {
                stream_id: stream.id,
                command: *command,
            }
        }
        Intent::Announce(request) => announce(snapshot, key, request)?,
        Intent::PlayMedia(media_id) => play_media(snapshot, key, media_id)?,
    };

    debug!(entity = %key, ?intent, ?call, "Planned command");
    Ok(DispatchPlan::single(key, call))
}

/// Issue every call of `plan` in order, stopping at the first failure.
pub async fn execute(api: &dyn AmpliPiApi, plan: &DispatchPlan) -> Result<(), ApiError> {
    for call in &plan.calls {
        match call {
            ApiCall::SetZone { zone_id, update } => api.set_zone(*zone_id, update).await?,
            ApiCall::SetZones(update) => api.set_zones(update).await?,
            ApiCall::SetSource { source_id, update } => {
                api.set_source(*source_id, update).await?
            }
            ApiCall::SetGroup { group_id, update } => api.set_group(*group_id, update).await?,
            ApiCall::Stream { stream_id, command } => {
                api.stream_command(*stream_id, *command).await?
            }
            ApiCall::Announce(announcement) => api.announce(announcement).await?,
        }
    }
    Ok(())
}

fn ensure_present(snapshot: &Snapshot, key: EntityKey) -> Result<(), Unresolvable> {
    let present = match key {
        EntityKey::Source(id) => snapshot.source(id).is_some(),
        EntityKey::Zone(id) => snapshot.zone(id).is_some(),
        EntityKey::Group(id) => snapshot.group(id).is_some(),
    };
    if present {
        Ok(())
    } else {
        Err(Unresolvable::MissingEntity(key))
    }
}

/// One multi-target update naming every zone and group bound to the source.
fn fan_out(
    snapshot: &Snapshot,
    source_id: u32,
    update: ZoneUpdate,
) -> Result<ApiCall, Unresolvable> {
    let multi = MultiZoneUpdate::new(
        snapshot.zones_for_source(source_id).map(|z| z.id),
        snapshot.groups_for_source(source_id).map(|g| g.id),
        update,
    );
    if multi.has_no_targets() {
        return Err(Unresolvable::NoTargets(source_id));
    }
    Ok(ApiCall::SetZones(multi))
}

fn set_volume(
    snapshot: &Snapshot,
    key: EntityKey,
    level: VolumeLevel,
    ctx: &ReconcileContext,
) -> Result<ApiCall, Unresolvable> {
    match key {
        EntityKey::Zone(zone_id) => {
            let zone = snapshot
                .zone(zone_id)
                .ok_or(Unresolvable::MissingEntity(key))?;
            let range = ctx.volume_range.with_overrides(zone.vol_min, zone.vol_max);
            Ok(ApiCall::SetZone {
                zone_id,
                update: ZoneUpdate::native_volume(level_to_db(level, range)),
            })
        }
        EntityKey::Group(group_id) => Ok(ApiCall::SetGroup {
            group_id,
            update: GroupUpdate::level(level),
        }),
        EntityKey::Source(source_id) => fan_out(snapshot, source_id, ZoneUpdate::level(level)),
    }
}

/// Source a zone or group is bound to, or the source itself.
fn bound_source(snapshot: &Snapshot, key: EntityKey) -> Result<&Source, Unresolvable> {
    let source_id = match key {
        EntityKey::Source(id) => Some(id),
        EntityKey::Zone(id) => snapshot.zone(id).and_then(|z| z.source_id),
        EntityKey::Group(id) => snapshot.group(id).and_then(|g| g.source_id),
    };
    source_id
        .and_then(|id| snapshot.source(id))
        .ok_or(Unresolvable::NoSource(key))
}

fn select_source(
    snapshot: &Snapshot,
    key: EntityKey,
    name: &str,
    ctx: &ReconcileContext,
) -> Result<ApiCall, Unresolvable> {
    match key {
        EntityKey::Source(source_id) => {
            let input = if let Some(stream) = snapshot.stream_by_name(name) {
                InputDescriptor::Stream(stream.id)
            } else if name.eq_ignore_ascii_case(LOCAL_INPUT_LABEL) {
                InputDescriptor::Local
            } else if name.eq_ignore_ascii_case(NO_INPUT_LABEL) {
                InputDescriptor::None
            } else {
                return Err(Unresolvable::UnknownSelection(name.to_string()));
            };
            Ok(ApiCall::SetSource {
                source_id,
                update: SourceUpdate::input(input),
            })
        }
        EntityKey::Zone(zone_id) => {
            let source = source_by_label(snapshot, name, ctx)?;
            Ok(ApiCall::SetZone {
                zone_id,
                update: ZoneUpdate::source(source.id),
            })
        }
        EntityKey::Group(group_id) => {
            let source = source_by_label(snapshot, name, ctx)?;
            Ok(ApiCall::SetGroup {
                group_id,
                update: GroupUpdate::source(source.id),
            })
        }
    }
}

fn source_by_label<'a>(
    snapshot: &'a Snapshot,
    name: &str,
    ctx: &ReconcileContext,
) -> Result<&'a Source, Unresolvable> {
    snapshot
        .sources()
        .iter()
        .find(|s| source_label(s, ctx) == name)
        .ok_or_else(|| Unresolvable::UnknownSelection(name.to_string()))
}

fn announce(
    snapshot: &Snapshot,
    key: EntityKey,
    request: &AnnounceRequest,
) -> Result<ApiCall, Unresolvable> {
    let media = validate_media_url(&request.media)?;
    let source = bound_source(snapshot, key)?;
    Ok(ApiCall::Announce(Announcement::new(
        &media,
        request.volume,
        source.id,
    )))
}

/// A stream name selects that stream on the entity's source; an http(s) URL
/// is announced on it.
fn play_media(snapshot: &Snapshot, key: EntityKey, media_id: &str) -> Result<ApiCall, Unresolvable> {
    let source = bound_source(snapshot, key)?;

    if let Some(stream) = snapshot.stream_by_name(media_id) {
        return Ok(ApiCall::SetSource {
            source_id: source.id,
            update: SourceUpdate::input(InputDescriptor::Stream(stream.id)),
        });
    }

    match validate_media_url(media_id) {
        Ok(media) => Ok(ApiCall::Announce(Announcement::new(&media, None, source.id))),
        Err(_) => Err(Unresolvable::UnknownMedia(media_id.to_string())),
    }
}
