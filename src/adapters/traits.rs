//! Lifecycle traits shared by the controller coordinator and the MQTT bridge

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::SharedBus;

// =============================================================================
// Startable - Uniform adapter lifecycle trait
// =============================================================================

/// Trait for services that can be started/stopped uniformly.
/// `main` drives the controller coordinator and the MQTT bridge through it.
#[async_trait]
pub trait Startable: Send + Sync {
    /// Adapter name (e.g., "amplipi", "mqtt")
    fn name(&self) -> &'static str;

    /// Start the adapter. No-op if already running or can't start.
    async fn start(&self) -> Result<()>;

    /// Stop the adapter gracefully.
    async fn stop(&self);

    /// Whether this adapter can be started (e.g., has required config).
    /// Default: true.
    async fn can_start(&self) -> bool {
        true
    }
}

/// Macro to implement Startable trait with minimal boilerplate.
///
/// Adapters must implement:
/// - `async fn start_internal(&self) -> Result<()>`
/// - `async fn stop_internal(&self)`
/// - Optionally: custom `can_start` method (pass as third arg)
///
/// Usage:
/// ```ignore
/// impl_startable!(EntityCoordinator, "amplipi");
/// impl_startable!(MqttAdapter, "mqtt", is_configured);  // custom can_start
/// ```
#[macro_export]
macro_rules! impl_startable {
    // With custom can_start method
    ($adapter:ty, $name:literal, $can_start:ident) => {
        #[async_trait::async_trait]
        impl $crate::adapters::Startable for $adapter {
            fn name(&self) -> &'static str {
                $name
            }

            async fn start(&self) -> anyhow::Result<()> {
                self.start_internal().await
            }

            async fn stop(&self) {
                self.stop_internal().await
            }

            async fn can_start(&self) -> bool {
                self.$can_start().await
            }
        }
    };
    // Default can_start (always true)
    ($adapter:ty, $name:literal) => {
        #[async_trait::async_trait]
        impl $crate::adapters::Startable for $adapter {
            fn name(&self) -> &'static str {
                $name
            }

            async fn start(&self) -> anyhow::Result<()> {
                self.start_internal().await
            }

            async fn stop(&self) {
                self.stop_internal().await
            }
        }
    };
}

/// Context passed to adapter logic during execution
pub struct AdapterContext {
    /// Event bus for publishing events
    pub bus: SharedBus,
    /// Cancellation token for shutdown coordination
    pub shutdown: CancellationToken,
}

/// Adapter-specific logic trait
///
/// Implementors provide setup and the polling/bridging loop.
/// Lifecycle (startup, shutdown, ACK, retry) is handled by AdapterHandle.
#[async_trait]
pub trait AdapterLogic: Send + Sync + 'static {
    /// Name used in logs and the AdapterStopped event
    fn prefix(&self) -> &'static str;

    /// Run the adapter's main loop.
    /// Returns Ok when ctx.shutdown is triggered, Err to be retried
    async fn run(&self, ctx: AdapterContext) -> Result<()>;

    /// Optional: called before run() for one-time setup
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}
