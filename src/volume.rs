//! Volume unit conversion
//!
//! The controller speaks decibels; entities speak a normalized level in
//! `[0.0, 1.0]`. The mapping is linear and fixed:
//!
//! - `0.0` is the quietest setting, the range's `min_db`
//! - `1.0` is the loudest setting, the range's `max_db`
//!
//! Both directions clamp to their target range and propagate `None`
//! ("unknown") instead of substituting zero.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller default zone range.
pub const DEFAULT_MIN_DB: f64 = -80.0;
pub const DEFAULT_MAX_DB: f64 = 0.0;

#[derive(Debug, Error, PartialEq)]
pub enum VolumeError {
    #[error("volume range min ({min_db} dB) must be below max ({max_db} dB)")]
    InvalidRange { min_db: f64, max_db: f64 },

    #[error("volume level {0} is outside 0.0..=1.0")]
    LevelOutOfRange(f64),
}

/// Native decibel bounds of a zone (or the configured default).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeRange {
    min_db: f64,
    max_db: f64,
}

impl VolumeRange {
    pub fn new(min_db: f64, max_db: f64) -> Result<Self, VolumeError> {
        if !(min_db.is_finite() && max_db.is_finite()) || min_db >= max_db {
            return Err(VolumeError::InvalidRange { min_db, max_db });
        }
        Ok(Self { min_db, max_db })
    }

    pub fn min_db(&self) -> f64 {
        self.min_db
    }

    pub fn max_db(&self) -> f64 {
        self.max_db
    }

    /// Range with optional per-record overrides; falls back to `self` when
    /// the overrides are absent or inconsistent.
    pub fn with_overrides(&self, min_db: Option<f64>, max_db: Option<f64>) -> Self {
        Self::new(
            min_db.unwrap_or(self.min_db),
            max_db.unwrap_or(self.max_db),
        )
        .unwrap_or(*self)
    }

    fn span(&self) -> f64 {
        self.max_db - self.min_db
    }
}

impl Default for VolumeRange {
    fn default() -> Self {
        Self {
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        }
    }
}

/// A validated normalized level in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct VolumeLevel(f64);

impl VolumeLevel {
    pub const MIN: Self = Self(0.0);
    pub const MAX: Self = Self(1.0);

    pub fn new(level: f64) -> Result<Self, VolumeError> {
        if (0.0..=1.0).contains(&level) {
            Ok(Self(level))
        } else {
            Err(VolumeError::LevelOutOfRange(level))
        }
    }

    /// Clamp any finite value into range; NaN becomes the minimum.
    pub fn saturating(level: f64) -> Self {
        if level.is_nan() {
            return Self::MIN;
        }
        Self(level.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for VolumeLevel {
    type Error = VolumeError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VolumeLevel> for f64 {
    fn from(level: VolumeLevel) -> Self {
        level.0
    }
}

/// Convert native dB to a normalized level. `None` stays `None`.
pub fn db_to_normalized(db: Option<f64>, range: VolumeRange) -> Option<f64> {
    let db = db.filter(|v| v.is_finite())?;
    let clamped = db.clamp(range.min_db, range.max_db);
    Some((clamped - range.min_db) / range.span())
}

/// Convert a normalized level to native dB. `None` stays `None`.
pub fn normalized_to_db(level: Option<f64>, range: VolumeRange) -> Option<f64> {
    let level = level.filter(|v| v.is_finite())?;
    Some(db_from_clamped(level.clamp(0.0, 1.0), range))
}

/// Native dB for a validated level.
pub fn level_to_db(level: VolumeLevel, range: VolumeRange) -> f64 {
    db_from_clamped(level.get(), range)
}

fn db_from_clamped(level: f64, range: VolumeRange) -> f64 {
    (range.min_db + level * range.span()).clamp(range.min_db, range.max_db)
}

/// Normalized level of a record carrying a native value and/or a normalized
/// value. The native value wins when both are present.
pub fn record_level(native_db: Option<f64>, normalized: Option<f64>, range: VolumeRange) -> Option<f64> {
    db_to_normalized(native_db, range)
        .or_else(|| normalized.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0)))
}
