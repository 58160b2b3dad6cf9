//! Trait for the live bus feed the tracker polls.

use anyhow::Result;

use crate::bus::Bus;
use crate::timing::TimingStatus;

/// Abstraction over the upstream live-vehicle service.
#[async_trait::async_trait]
pub trait BusFeed: Send + Sync {
    /// Returns every vehicle currently reported by the feed.
    async fn fetch_buses(&self) -> Result<Vec<Bus>>;

    /// Returns the punctuality of the vehicle running `journey_code`, if the
    /// service reports one.
    async fn fetch_timing_status(&self, journey_code: &str) -> Result<Option<TimingStatus>>;
}
