use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure or a non-2xx response.
    #[error("fetching {url} failed: {detail}")]
    Network {
        url: String,
        status: Option<StatusCode>,
        detail: String,
    },

    #[error("invalid url `{url}`")]
    InvalidUrl { url: String },

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            status: err.status(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Upstream has no resource for this slice, which is expected and not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FetchError::Network {
                status: Some(StatusCode::NOT_FOUND),
                ..
            }
        )
    }
}
