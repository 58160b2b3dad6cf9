use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;

use crate::bus::{Bus, decode_buses};
use crate::config::FeedConfig;
use crate::fetch::{BasicClient, BrowserHeaders, HttpClient, Retry, fetch_bytes, fetch_json};
use crate::services::bus_feed::BusFeed;
use crate::timing::{TimingStatus, VehicleDetails};

/// The production HTTP stack: timeout, then WAF headers, then retry.
pub type FeedHttpClient = Retry<BrowserHeaders<BasicClient>>;

/// Client for the Go Coach bus-tracker widget API.
pub struct GoCoachClient<C = FeedHttpClient> {
    http: C,
    buses_url: Url,
    vehicle_url: Url,
}

impl GoCoachClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Retry {
            inner: BrowserHeaders::new(
                BasicClient::with_timeout(config.timeout)?,
                &config.user_agent,
                Some(&config.referer),
            )?,
            max_attempts: config.max_attempts,
            delay: config.retry_delay,
        };
        Self::with_http_client(http, config)
    }
}

impl<C: HttpClient> GoCoachClient<C> {
    /// Uses `http` as-is; the caller decides on headers and retries.
    pub fn with_http_client(http: C, config: &FeedConfig) -> Result<Self> {
        let buses_url = Url::parse(&config.buses_url)
            .with_context(|| format!("invalid bus list URL '{}'", config.buses_url))?;
        let vehicle_url = Url::parse(&config.vehicle_url)
            .with_context(|| format!("invalid vehicle URL '{}'", config.vehicle_url))?;
        if vehicle_url.cannot_be_a_base() {
            return Err(anyhow!("vehicle URL '{}' cannot take a path", config.vehicle_url));
        }
        Ok(Self {
            http,
            buses_url,
            vehicle_url,
        })
    }

    fn timing_url(&self, journey_code: &str) -> Url {
        let mut url = self.vehicle_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(journey_code);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("includeLastCleanedLog", "true")
            .append_pair("includeTimings", "true")
            .append_pair("includeLiveOccupancy", "true");
        url
    }
}

#[async_trait]
impl<C: HttpClient> BusFeed for GoCoachClient<C> {
    #[tracing::instrument(skip(self))]
    async fn fetch_buses(&self) -> Result<Vec<Bus>> {
        let bytes = fetch_bytes(&self.http, self.buses_url.as_str())
            .await
            .context("failed to fetch bus list")?;
        let buses = decode_buses(&bytes).context("failed to decode bus list")?;
        Ok(buses)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_timing_status(&self, journey_code: &str) -> Result<Option<TimingStatus>> {
        let url = self.timing_url(journey_code);
        let details: VehicleDetails = fetch_json(&self.http, url.as_str())
            .await
            .with_context(|| format!("failed to fetch timing for journey '{journey_code}'"))?;
        Ok(details.timing_status)
    }
}
