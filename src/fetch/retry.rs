use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::{Request, Response};
use std::time::Duration;
use tracing::warn;

/// An [`HttpClient`] wrapper that re-sends a request after transport errors
/// and non-2xx responses.
///
/// At most `max_attempts` requests are made (at least one), with a fixed
/// `delay` between them. The last error is returned when all attempts fail.
/// Requests whose body cannot be cloned are sent once.
pub struct Retry<C> {
    pub inner: C,
    pub max_attempts: u32,
    pub delay: Duration,
}

#[async_trait]
impl<C: HttpClient> HttpClient for Retry<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let copy = if attempt < max_attempts {
                req.try_clone()
            } else {
                None
            };
            let Some(copy) = copy else {
                return self
                    .inner
                    .execute(req)
                    .await
                    .and_then(Response::error_for_status);
            };

            match self
                .inner
                .execute(copy)
                .await
                .and_then(Response::error_for_status)
            {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(
                        url = %req.url(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
