mod basic;
mod client;
mod headers;
mod retry;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use headers::BrowserHeaders;
pub use retry::Retry;

use anyhow::Result;
use serde::de::DeserializeOwned;
use tracing::debug;

/// GETs `url` and returns the body of a successful response.
///
/// # Errors
///
/// Returns an error if the URL is invalid, the request fails, or the
/// response status is not 2xx.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    let bytes = resp.bytes().await?.to_vec();
    debug!(url, bytes = bytes.len(), "Response received");
    Ok(bytes)
}

/// GETs `url` and deserializes the JSON body.
pub async fn fetch_json<C: HttpClient, T: DeserializeOwned>(client: &C, url: &str) -> Result<T> {
    let bytes = fetch_bytes(client, url).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
