use crate::fetch::client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue, REFERER, USER_AGENT};

/// An [`HttpClient`] wrapper that makes requests look like they come from the
/// operator's own web widget.
///
/// The upstream sits behind a WAF that rejects requests without a browser
/// `User-Agent` and the widget page as `Referer`. Every request also gets
/// `Accept: application/json`.
pub struct BrowserHeaders<C> {
    inner: C,
    user_agent: HeaderValue,
    referer: Option<HeaderValue>,
}

impl<C> BrowserHeaders<C> {
    /// Validates the header values up front so sending never fails on them.
    pub fn new(inner: C, user_agent: &str, referer: Option<&str>) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .with_context(|| format!("invalid User-Agent header value '{user_agent}'"))?;
        let referer = referer
            .map(|r| {
                HeaderValue::from_str(r)
                    .with_context(|| format!("invalid Referer header value '{r}'"))
            })
            .transpose()?;
        Ok(Self {
            inner,
            user_agent,
            referer,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for BrowserHeaders<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let headers = req.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, self.user_agent.clone());
        if let Some(referer) = &self.referer {
            headers.insert(REFERER, referer.clone());
        }
        self.inner.execute(req).await
    }
}
