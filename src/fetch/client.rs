use async_trait::async_trait;
use reqwest::{Method, Request, Response};

use super::FetchError;

/// Transport seam for the fetch layer; wrappers add headers, tests stub responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;

    /// Issues a GET for `url`. Only transport failures are errors here;
    /// the status is left for the caller to judge.
    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let parsed = url.parse().map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        self.execute(Request::new(Method::GET, parsed))
            .await
            .map_err(|e| FetchError::transport(url, e))
    }
}
