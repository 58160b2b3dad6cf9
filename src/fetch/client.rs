use async_trait::async_trait;
use reqwest::{Request, Response};

/// Anything that can execute a prepared request. Layers wrap an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
