//! Camera image download
//!
//! A single HTTP(S) GET of the camera's image URL, with optional basic
//! authentication. No retries: the next scheduled poll is the retry.

use reqwest::StatusCode;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Request timeout used when none is configured
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("No camera URL configured")]
    EmptyUrl,
    #[error("Error opening URL {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{status}")]
    Status { url: String, status: StatusCode },
    #[error("Error reading image from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A downloaded image and how long it took
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub payload: Vec<u8>,
    /// Request start to body fully read, in whole milliseconds (at least 1 ms)
    pub elapsed: Duration,
}

impl FetchedImage {
    pub fn latency_millis(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// HTTP image fetcher shared by all poll tasks
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// Download the image at `url`. An empty `login` sends no credentials.
    pub async fn fetch(&self, url: &str, login: &str, password: &str) -> Result<FetchedImage, FetchError> {
        if url.is_empty() {
            return Err(FetchError::EmptyUrl);
        }
        debug!(url = %url, "Reading camera image");

        let start = Instant::now();
        let mut request = self.client.get(url);
        if !login.is_empty() {
            request = request.basic_auth(login, Some(password));
        }

        let response = request.send().await.map_err(|source| {
            warn!(url = %url, error = %source, "Error opening camera URL");
            FetchError::Request {
                url: url.to_string(),
                source,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Camera returned non-success status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let payload = response.bytes().await.map_err(|source| {
            warn!(url = %url, error = %source, "Error reading camera image");
            FetchError::Body {
                url: url.to_string(),
                source,
            }
        })?;

        Ok(FetchedImage {
            payload: payload.to_vec(),
            elapsed: round_to_millis(start.elapsed()),
        })
    }
}

fn round_to_millis(elapsed: Duration) -> Duration {
    let millis = (elapsed.as_micros() + 500) / 1000;
    Duration::from_millis(millis.max(1) as u64)
}
