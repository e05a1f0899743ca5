//! Mock servers for integration testing
//!
//! Simulates the AmpliPi controller's REST API so the client, coordinator and
//! HTTP layer can be exercised end to end without hardware.

pub mod amplipi;

pub use amplipi::MockAmpliPi;
