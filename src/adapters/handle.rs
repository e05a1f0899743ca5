//! AdapterHandle - Wraps AdapterLogic with consistent lifecycle management
//!
//! Provides automatic retry with exponential backoff when the controller is
//! unreachable at startup or a bridge loop dies. Adapters never loop on
//! their own errors; they return `Err` and let the handle back off.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::traits::{AdapterContext, AdapterLogic};
use crate::bus::{BusEvent, SharedBus};

/// Consecutive failures after which retries are logged at error level.
const LOUD_FAILURE_THRESHOLD: u32 = 3;

/// Retry configuration for adapter startup/run
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay between retry attempts
    pub initial_delay: Duration,
    /// Maximum delay (backoff caps at this value)
    pub max_delay: Duration,
    /// A run lasting at least this long resets the backoff on failure
    pub stable_run_threshold: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            stable_run_threshold: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay following `current`, doubled and capped.
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Runs an [`AdapterLogic`] until shutdown, publishing `AdapterStopped` on exit.
pub struct AdapterHandle<T: AdapterLogic> {
    logic: Arc<T>,
    bus: SharedBus,
    shutdown: CancellationToken,
}

impl<T: AdapterLogic> AdapterHandle<T> {
    pub fn new(logic: T, bus: SharedBus, shutdown: CancellationToken) -> Self {
        Self {
            logic: Arc::new(logic),
            bus,
            shutdown,
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.logic.prefix()
    }

    /// Run until `Ok` or shutdown, retrying `Err` with exponential backoff.
    ///
    /// Backoff resets to `initial_delay` when the failed run lasted at least
    /// `stable_run_threshold`.
    pub async fn run_with_retry(self, config: RetryConfig) -> Result<()> {
        let prefix = self.logic.prefix();
        let mut delay = config.initial_delay;
        let mut failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                info!("{}: shutdown before attempt", prefix);
                break;
            }

            info!("{}: starting", prefix);

            let start = Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    info!("{}: clean exit", prefix);
                    break;
                }
                Err(e) => {
                    let ran_for = start.elapsed();
                    if ran_for >= config.stable_run_threshold {
                        info!("{}: ran for {:?} before failure, resetting backoff", prefix, ran_for);
                        delay = config.initial_delay;
                        failures = 0;
                    }
                    failures += 1;

                    if failures >= LOUD_FAILURE_THRESHOLD {
                        error!(
                            "{}: failed {} times in a row ({}), retrying in {:?}",
                            prefix, failures, e, delay
                        );
                    } else {
                        warn!("{}: error ({}), retrying in {:?}", prefix, e, delay);
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!("{}: shutdown during backoff", prefix);
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {
                            delay = config.next_delay(delay);
                        }
                    }
                }
            }
        }

        self.bus.publish(BusEvent::AdapterStopped {
            adapter: prefix.to_string(),
        });

        info!("{}: stopped", prefix);
        Ok(())
    }

    /// One attempt: `Ok` on shutdown or clean completion, `Err` to retry.
    async fn run_once(&self) -> Result<()> {
        let prefix = self.logic.prefix();

        self.logic.init().await?;

        let mut rx = self.bus.subscribe();
        let ctx = AdapterContext {
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
        };

        tokio::select! {
            result = self.logic.run(ctx) => result,

            _ = async {
                loop {
                    match rx.recv().await {
                        Ok(BusEvent::ShuttingDown { .. }) | Err(RecvError::Closed) => break,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                    }
                }
            } => {
                info!("{}: stopping due to ShuttingDown event", prefix);
                Ok(())
            }

            _ = self.shutdown.cancelled() => {
                info!("{}: cancelled via token", prefix);
                Ok(())
            }
        }
    }
}
