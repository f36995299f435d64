//! The fetchers get the vulnerabilities from a source, through a
//! [`Transport`] that tests can replace.

pub mod nvd;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use reqwest::Client;
use thiserror::Error;

/// The longest part of a response body kept in an error message.
const ERROR_BODY_MAX_CHARS: usize = 200;

/// The status and body of an HTTP response.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The body of the response.
    pub body: String,
}

/// A common interface to send the GET requests of a fetcher.
///
/// An `Err` means the request couldn't be completed at all (DNS, connection,
/// timeout). Any response received, whatever its status, is an `Ok`.
#[async_trait]
pub trait Transport {
    /// Sends a GET request to the URL with the given headers.
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String>;
}

/// A transport sending real HTTP requests with reqwest.
pub struct HttpTransport {
    /// The client, reused for every request.
    client: Client,
}

impl HttpTransport {
    /// Creates a new HttpTransport where every request times out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, String> {
        trace!("Running HttpTransport::get()");
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Error while sending an HTTP request to {}: {}", url, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Error while reading the HTTP response of {}: {}", url, e))?;

        Ok(HttpResponse { status, body })
    }
}

/// The ways fetching vulnerabilities can fail.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never got a response.
    #[error("request failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
    /// The API answered 429 or 503 on every attempt.
    #[error("rate limited by the NVD API after {attempts} attempt(s) (HTTP {status})")]
    RateLimited { status: u16, attempts: u32 },
    /// The API answered with a 5xx on every attempt.
    #[error("NVD API server error after {attempts} attempt(s) (HTTP {status}): {message}")]
    ServerFault {
        status: u16,
        attempts: u32,
        message: String,
    },
    /// The API refused the request, retrying won't help.
    #[error("HTTP {status}: {message}")]
    ClientFault { status: u16, message: String },
    /// A successful response whose body isn't what the NVD API returns.
    #[error("invalid JSON returned by the NVD API: {0}")]
    MalformedResponse(String),
    /// The HTTP client couldn't be created.
    #[error("unable to create the HTTP client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport { .. }
                | FetchError::RateLimited { .. }
                | FetchError::ServerFault { .. }
        )
    }

    /// Builds the error matching a non-successful HTTP status.
    pub fn from_status(response: &HttpResponse, attempts: u32) -> Self {
        let status = response.status;
        match status {
            429 | 503 => FetchError::RateLimited { status, attempts },
            s if s >= 500 => FetchError::ServerFault {
                status,
                attempts,
                message: body_excerpt(&response.body),
            },
            _ => FetchError::ClientFault {
                status,
                message: body_excerpt(&response.body),
            },
        }
    }
}

/// Keeps the start of a body, on one line, to put it in an error message.
fn body_excerpt(body: &str) -> String {
    let single_line = body.split_whitespace().collect::<Vec<&str>>().join(" ");
    if single_line.chars().count() > ERROR_BODY_MAX_CHARS {
        let kept: String = single_line.chars().take(ERROR_BODY_MAX_CHARS).collect();
        format!("{}...", kept)
    } else {
        single_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            FetchError::from_status(&response(429, ""), 1),
            FetchError::RateLimited { status: 429, .. }
        ));
        assert!(matches!(
            FetchError::from_status(&response(503, ""), 1),
            FetchError::RateLimited { status: 503, .. }
        ));
        assert!(matches!(
            FetchError::from_status(&response(502, "Bad gateway"), 2),
            FetchError::ServerFault { status: 502, attempts: 2, .. }
        ));
        assert!(matches!(
            FetchError::from_status(&response(404, "Not found"), 1),
            FetchError::ClientFault { status: 404, .. }
        ));
    }

    #[test]
    fn retryable_errors() {
        assert!(FetchError::from_status(&response(429, ""), 1).is_retryable());
        assert!(FetchError::from_status(&response(500, ""), 1).is_retryable());
        assert!(FetchError::Transport {
            attempts: 1,
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!FetchError::from_status(&response(403, ""), 1).is_retryable());
        assert!(!FetchError::MalformedResponse("eof".to_string()).is_retryable());
    }

    #[test]
    fn long_bodies_are_cut() {
        let body = format!("<html>\n{}\n</html>", "a".repeat(500));
        let error = FetchError::from_status(&response(500, &body), 5);
        if let FetchError::ServerFault { message, .. } = error {
            assert!(message.starts_with("<html> aaa"));
            assert!(message.ends_with("..."));
            assert_eq!(message.chars().count(), ERROR_BODY_MAX_CHARS + 3);
        } else {
            panic!("Expected a server fault");
        }
    }
}
