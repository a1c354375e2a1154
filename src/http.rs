use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Settings;
use crate::error::GeoextentError;

/// An open response body plus the length the server announced, if any.
pub struct RemoteStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Anything that can open a byte stream for a URL. The downloader only
/// depends on this, so tests can feed it in-memory bodies.
pub trait FileSource: Sync {
    fn open(&self, url: &str) -> Result<RemoteStream, GeoextentError>;
}

#[derive(Clone)]
pub struct HttpClient {
    api: Client,
    transfer: Client,
    max_retries: usize,
    base_delay: Duration,
    throttle: Option<Arc<Throttle>>,
}

struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    fn wait(&self) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Result<Self, GeoextentError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| GeoextentError::InvalidOption(err.to_string()))?,
        );
        let api = Client::builder()
            .default_headers(headers.clone())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|err| GeoextentError::Upstream(err.to_string()))?;
        // Transfers can legitimately run for a long time; only connecting is bounded.
        let transfer = Client::builder()
            .default_headers(headers)
            .timeout(None)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|err| GeoextentError::Upstream(err.to_string()))?;
        let throttle = (settings.min_request_interval_ms > 0).then(|| {
            Arc::new(Throttle {
                interval: Duration::from_millis(settings.min_request_interval_ms),
                last: Mutex::new(None),
            })
        });
        Ok(Self {
            api,
            transfer,
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            throttle,
        })
    }

    pub fn get(&self, url: &str) -> Result<Response, GeoextentError> {
        let response = self.send_with_retries(|| self.api.get(url))?;
        Self::handle_status(response, url)
    }

    pub fn get_with_token(&self, url: &str, token: Option<&str>) -> Result<Response, GeoextentError> {
        let response = self.send_with_retries(|| {
            let request = self.api.get(url);
            match token {
                Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
                None => request,
            }
        })?;
        Self::handle_status(response, url)
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GeoextentError> {
        let response = self.send_with_retries(|| self.api.get(url).header(ACCEPT, "application/json"))?;
        let response = Self::handle_status(response, url)?;
        response
            .json()
            .map_err(|err| GeoextentError::Upstream(format!("{url}: {err}")))
    }

    pub fn get_text(&self, url: &str) -> Result<String, GeoextentError> {
        let response = self.get(url)?;
        response
            .text()
            .map_err(|err| GeoextentError::Upstream(format!("{url}: {err}")))
    }

    /// Authoritative existence check: `Ok(false)` only for 404/410.
    pub fn exists(&self, url: &str) -> Result<bool, GeoextentError> {
        let response = self.send_with_retries(|| self.api.get(url))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            status => Err(GeoextentError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    fn handle_status(response: Response, url: &str) -> Result<Response, GeoextentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(GeoextentError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(GeoextentError::RestrictedAccess(url.to_string()))
            }
            _ => Err(GeoextentError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, GeoextentError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            if let Some(throttle) = &self.throttle {
                throttle.wait();
            }
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        let delay = self.retry_delay(attempt, &resp);
                        debug!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        let delay = self.base_delay * (attempt as u32 + 1);
                        debug!(error = %err, attempt, "retrying request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(GeoextentError::Upstream(err.to_string()));
                }
            }
        }
    }

    fn retry_delay(&self, attempt: usize, response: &Response) -> Duration {
        let linear = self.base_delay * (attempt as u32 + 1);
        let announced = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.min(30)));
        announced.map_or(linear, |announced| announced.max(linear))
    }
}

impl FileSource for HttpClient {
    fn open(&self, url: &str) -> Result<RemoteStream, GeoextentError> {
        let response = self.send_with_retries(|| self.transfer.get(url))?;
        let response = Self::handle_status(response, url)?;
        Ok(RemoteStream {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn throttle_spaces_requests() {
        let throttle = Throttle {
            interval: Duration::from_millis(30),
            last: Mutex::new(None),
        };
        let start = Instant::now();
        throttle.wait();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
