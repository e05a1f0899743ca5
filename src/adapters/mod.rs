//! Adapter lifecycle (retrying run loop, uniform start/stop) and the MQTT bridge

pub mod handle;
pub mod mqtt;
pub mod traits;

pub use handle::{AdapterHandle, RetryConfig};
pub use traits::{AdapterContext, AdapterLogic, Startable};
