//! Media URLs and stream browsing

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::snapshot::Snapshot;

#[derive(Debug, Error, PartialEq)]
pub enum MediaError {
    #[error("media URL is empty")]
    Empty,

    #[error("invalid media URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("unsupported media URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}

/// Resolve an artwork reference against the controller's base path.
///
/// Absolute http(s) URLs pass through untouched. Anything else is joined onto
/// `base` and re-validated; a result that still does not parse is dropped.
pub fn resolve_artwork_url(base: &str, candidate: Option<&str>) -> Option<String> {
    let candidate = candidate.map(str::trim).filter(|c| !c.is_empty())?;

    if let Ok(url) = Url::parse(candidate) {
        if is_http(&url) {
            return Some(candidate.to_string());
        }
    }

    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        candidate.trim_start_matches('/')
    );
    match Url::parse(&joined) {
        Ok(url) if is_http(&url) => Some(joined),
        _ => None,
    }
}

/// Accept only absolute http(s) URLs for announcements and media playback.
pub fn validate_media_url(raw: &str) -> Result<Url, MediaError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MediaError::Empty);
    }

    let url = Url::parse(raw).map_err(|e| MediaError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(MediaError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(MediaError::Invalid {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Media class of a browse node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    Directory,
    Music,
}

/// A node in the media browse tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseMedia {
    pub title: String,
    pub media_class: MediaClass,
    pub media_content_id: String,
    pub can_play: bool,
    pub can_expand: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BrowseMedia>,
}

pub const BROWSE_ROOT_TITLE: &str = "AmpliPi";
pub const BROWSE_ROOT_ID: &str = "streams";

/// One-level directory of the controller's streams.
///
/// Each child's content id is the stream name, which `PlayMedia` accepts.
pub fn browse_streams(snapshot: &Snapshot) -> BrowseMedia {
    let children = snapshot
        .streams()
        .iter()
        .map(|stream| BrowseMedia {
            title: format!("{} - {}", stream.name, stream.stream_type),
            media_class: MediaClass::Music,
            media_content_id: stream.name.clone(),
            can_play: true,
            can_expand: false,
            children: Vec::new(),
        })
        .collect();

    BrowseMedia {
        title: BROWSE_ROOT_TITLE.to_string(),
        media_class: MediaClass::Directory,
        media_content_id: BROWSE_ROOT_ID.to_string(),
        can_play: false,
        can_expand: true,
        children,
    }
}
