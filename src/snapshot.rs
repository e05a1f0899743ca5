//! Status snapshot
//!
//! One `GET /api/` round-trip is the only way state enters the system. A
//! snapshot is either complete or absent: a failed fetch yields an error and
//! never a partially filled document.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use crate::amplipi::{AmpliPiApi, ApiError, Group, Source, Status, Stream, Zone};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("status fetch failed: {0}")]
    Fetch(#[from] ApiError),
}

impl SnapshotError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
        }
    }
}

/// Immutable view of the controller at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    status: Status,
}

impl Snapshot {
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn sources(&self) -> &[Source] {
        &self.status.sources
    }

    pub fn zones(&self) -> &[Zone] {
        &self.status.zones
    }

    pub fn groups(&self) -> &[Group] {
        &self.status.groups
    }

    pub fn streams(&self) -> &[Stream] {
        &self.status.streams
    }

    pub fn source(&self, id: u32) -> Option<&Source> {
        self.status.sources.iter().find(|s| s.id == id)
    }

    pub fn zone(&self, id: u32) -> Option<&Zone> {
        self.status.zones.iter().find(|z| z.id == id)
    }

    pub fn group(&self, id: u32) -> Option<&Group> {
        self.status.groups.iter().find(|g| g.id == id)
    }

    pub fn stream(&self, id: u32) -> Option<&Stream> {
        self.status.streams.iter().find(|s| s.id == id)
    }

    pub fn stream_by_name(&self, name: &str) -> Option<&Stream> {
        self.status.streams.iter().find(|s| s.name == name)
    }

    /// The stream a source is playing, if its input names one that exists.
    ///
    /// Dangling or malformed references resolve to `None`.
    pub fn current_stream(&self, source: &Source) -> Option<&Stream> {
        source
            .input_descriptor()
            .stream_id()
            .and_then(|id| self.stream(id))
    }

    pub fn zones_for_source(&self, source_id: u32) -> impl Iterator<Item = &Zone> + Clone {
        self.status
            .zones
            .iter()
            .filter(move |z| z.source_id == Some(source_id))
    }

    pub fn groups_for_source(&self, source_id: u32) -> impl Iterator<Item = &Group> + Clone {
        self.status
            .groups
            .iter()
            .filter(move |g| g.source_id == Some(source_id))
    }

    pub fn groups_containing_zone(&self, zone_id: u32) -> impl Iterator<Item = &Group> + Clone {
        self.status
            .groups
            .iter()
            .filter(move |g| g.zones.contains(&zone_id))
    }

    /// Member zones of a group that exist in this snapshot.
    pub fn member_zones<'a>(&'a self, group: &'a Group) -> impl Iterator<Item = &'a Zone> + Clone {
        group.zones.iter().filter_map(move |id| self.zone(*id))
    }
}

/// Performs the single status round-trip.
#[derive(Clone)]
pub struct SnapshotFetcher {
    api: Arc<dyn AmpliPiApi>,
}

impl SnapshotFetcher {
    pub fn new(api: Arc<dyn AmpliPiApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn AmpliPiApi> {
        &self.api
    }

    pub async fn fetch(&self) -> Result<Snapshot, SnapshotError> {
        let started = Instant::now();
        let status = self.api.get_status().await?;
        debug!(
            sources = status.sources.len(),
            zones = status.zones.len(),
            groups = status.groups.len(),
            streams = status.streams.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched AmpliPi status"
        );
        Ok(Snapshot::new(status))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let status: Status = serde_json::from_value(json!({
            "sources": [
                {"id": 0, "name": "Living", "input": "stream=1000"},
                {"id": 1, "name": "Den", "input": "stream=7"}
            ],
            "zones": [
                {"id": 1, "name": "Kitchen", "source_id": 0},
                {"id": 2, "name": "Patio", "source_id": 0},
                {"id": 3, "name": "Office", "source_id": 1}
            ],
            "groups": [
                {"id": 5, "name": "Downstairs", "source_id": 0, "zones": [1, 2, 9]}
            ],
            "streams": [{"id": 1000, "name": "Groove Salad", "type": "internetradio"}]
        }))
        .unwrap();
        Snapshot::new(status)
    }

    #[test]
    fn test_lookups() {
        let snap = snapshot();
        assert_eq!(snap.source(1).unwrap().name, "Den");
        assert!(snap.zone(42).is_none());
        assert_eq!(snap.group(5).unwrap().zones, vec![1, 2, 9]);
        assert_eq!(snap.stream_by_name("Groove Salad").unwrap().id, 1000);
    }

    #[test]
    fn test_dangling_stream_reference_is_none() {
        let snap = snapshot();
        let den = snap.source(1).unwrap();
        assert!(snap.current_stream(den).is_none());
        let living = snap.source(0).unwrap();
        assert_eq!(snap.current_stream(living).unwrap().id, 1000);
    }

    #[test]
    fn test_associations() {
        let snap = snapshot();
        let zones: Vec<u32> = snap.zones_for_source(0).map(|z| z.id).collect();
        assert_eq!(zones, vec![1, 2]);
        let groups: Vec<u32> = snap.groups_for_source(0).map(|g| g.id).collect();
        assert_eq!(groups, vec![5]);
        let containing: Vec<u32> = snap.groups_containing_zone(2).map(|g| g.id).collect();
        assert_eq!(containing, vec![5]);

        // Zone 9 is not in the snapshot and is skipped
        let group = snap.group(5).unwrap();
        let members: Vec<u32> = snap.member_zones(group).map(|z| z.id).collect();
        assert_eq!(members, vec![1, 2]);
    }
}
