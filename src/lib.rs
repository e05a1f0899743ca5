//! AmpliPi Control - Rust Implementation
//!
//! Mirrors an AmpliPi multi-zone audio controller's sources, zones and groups
//! as media-player entities, and turns player commands back into controller
//! calls.
//!
//! This library provides:
//! - A typed REST client for the controller
//! - Snapshot polling with per-entity state reconciliation
//! - Command dispatch with source fan-out and group power handling
//! - MQTT bridge for Home Assistant
//! - HTTP API with Server-Sent Events for real-time updates

pub mod adapters;
pub mod amplipi;
pub mod api;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod media;
pub mod snapshot;
pub mod volume;
