//! Runtime settings for the feed client and the tracker.
//!
//! Defaults are the production values. [`FeedConfig::from_env`] and
//! [`TrackerConfig::from_env`] overlay any `BUS_*` environment variables
//! (a `.env` file is loaded by the binary before these run).

use anyhow::{Context, Result};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BUSES_URL: &str =
    "https://portal.go-coach.co.uk/v5/widget/api/buses?region=&showBusesNotInService=false";
pub const DEFAULT_VEHICLE_URL: &str = "https://portal.go-coach.co.uk/api/vehicle/";
pub const DEFAULT_REFERER: &str = "https://portal.go-coach.co.uk/WidgetV5/BusTracker?guid=d434607b-a8ad-450a-a16c-98ede0e08af3&style=gocoach&showBusTimings=true&operators=GoCoach&region=&origin=&destination=";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Where and how to reach the upstream feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub buses_url: String,
    /// Base of the per-vehicle endpoint; the journey code is appended as a path segment.
    pub vehicle_url: String,
    pub referer: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buses_url: DEFAULT_BUSES_URL.to_string(),
            vehicle_url: DEFAULT_VEHICLE_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("BUS_FEED_URL") {
            config.buses_url = url;
        }
        if let Some(url) = lookup("BUS_VEHICLE_URL") {
            config.vehicle_url = url;
        }
        if let Some(referer) = lookup("BUS_FEED_REFERER") {
            config.referer = referer;
        }
        if let Some(agent) = lookup("BUS_FEED_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "BUS_FEED_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var(&lookup, "BUS_FEED_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "BUS_FEED_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(millis);
        }
        Ok(config)
    }
}

/// Timing-cache and polling settings for the tracker.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Maximum age of a cached timing status before it is dropped.
    pub timing_ttl: Duration,
    pub refresh_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timing_ttl: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "BUS_TIMING_TTL_SECS")? {
            config.timing_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "BUS_REFRESH_INTERVAL_SECS")? {
            config.refresh_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("{key} has invalid value '{raw}'"))
        })
        .transpose()
}
