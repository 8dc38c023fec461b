//! Wait-for-set coordination.
//!
//! Blocks until every required classification has been drained at least
//! once during the wait, or the deadline passes. This is the only place the
//! harvester sleeps on network activity.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::capture::ResponseCollector;
use crate::driver::BrowserDriver;
use crate::error::{HarvestError, HarvestResult};
use crate::types::Classification;

/// Default deadline for a required set (120 seconds).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Default interval between drains (3 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Timing of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub deadline: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Wait until each of `required` has been captured.
///
/// An empty set returns immediately without draining.
pub async fn wait_for_set(
    driver: &mut dyn BrowserDriver,
    collector: &mut ResponseCollector,
    required: &[Classification],
    options: WaitOptions,
) -> HarvestResult<()> {
    let mut pending: BTreeSet<Classification> = required.iter().copied().collect();
    if pending.is_empty() {
        return Ok(());
    }

    info!(pending = ?pending, "Waiting for responses");
    let start = Instant::now();

    loop {
        sleep(options.poll_interval).await;

        let found = collector.drain_new_responses(driver).await?;
        pending.retain(|c| !found.contains(c));
        debug!(pending = ?pending, elapsed_ms = start.elapsed().as_millis() as u64, "Polled probe");

        if pending.is_empty() {
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "Required responses received");
            return Ok(());
        }

        if start.elapsed() > options.deadline {
            return Err(HarvestError::Timeout {
                pending,
                waited_secs: options.deadline.as_secs(),
            });
        }
    }
}
