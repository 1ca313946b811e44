use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, InvalidHeaderValue, USER_AGENT};

/// Browser-like agent string; the history server rejects some default agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// An [`HttpClient`] wrapper that sets the `User-Agent` header on every request.
pub struct UserAgent<C> {
    inner: C,
    value: HeaderValue,
}

impl<C> UserAgent<C> {
    pub fn new(inner: C, agent: &str) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            inner,
            value: HeaderValue::from_str(agent)?,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UserAgent<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(USER_AGENT, self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        agents: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for Capture {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let agent = req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.agents.lock().unwrap().push(agent);
            Ok(reqwest::Response::from(http::Response::new(Vec::<u8>::new())))
        }
    }

    #[tokio::test]
    async fn test_sets_header_on_every_request() {
        let client = UserAgent::new(Capture::default(), DEFAULT_USER_AGENT).unwrap();
        let url: reqwest::Url = "https://host/a.xml".parse().unwrap();

        client
            .execute(reqwest::Request::new(reqwest::Method::GET, url.clone()))
            .await
            .unwrap();
        client
            .execute(reqwest::Request::new(reqwest::Method::GET, url))
            .await
            .unwrap();

        let agents = client.inner.agents.lock().unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().all(|a| a == DEFAULT_USER_AGENT));
    }

    #[test]
    fn test_rejects_invalid_header_value() {
        assert!(UserAgent::new(Capture::default(), "bad\nagent").is_err());
    }
}
