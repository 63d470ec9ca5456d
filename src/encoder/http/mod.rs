
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EncodedPage, Encoder, NativeSearchResult};
use crate::config::Config;

const DEFAULT_BACKOFF_MS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Encoder reached over a JSON HTTP API
#[derive(Debug, Clone)]
pub struct HttpEncoder {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EncodeDocumentRequest<'a> {
    model: &'a str,
    file_name: &'a str,
    document: String,
}

#[derive(Debug, Deserialize)]
struct EncodedPagePayload {
    image: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EncodeDocumentResponse {
    pages: Vec<EncodedPagePayload>,
}

#[derive(Debug, Serialize)]
struct EncodeQueryRequest<'a> {
    model: &'a str,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct EncodeQueryResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct IndexAddRequest<'a> {
    model: &'a str,
    index: &'a str,
    file_name: &'a str,
    document: String,
}

#[derive(Debug, Deserialize)]
struct IndexAddResponse {
    pages_indexed: usize,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    index: &'a str,
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<NativeSearchResult>,
}

impl HttpEncoder {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .encoder_url()
            .context("Failed to generate encoder URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.encoder.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.encoder.model.clone(),
            agent,
            retry_attempts: config.encoder.retry_attempts.max(1),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry, doubled on every later attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))
    }

    fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(path)?;
        let request_json = serde_json::to_string(request)
            .with_context(|| format!("Failed to serialize request for {}", path))?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("Request to {} failed", url))?;

        serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse response from {}", path))
    }

    fn read_document(path: &Path) -> Result<(String, String)> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Document path has no file name: {}", path.display()))?
            .to_string();
        Ok((file_name, STANDARD.encode(bytes)))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) as u32;
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

impl Encoder for HttpEncoder {
    #[inline]
    fn health_check(&self) -> Result<()> {
        let url = self.endpoint("/health")?;
        debug!("Performing health check for encoder at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Encoder health check failed")?;

        info!(
            "Health check passed for encoder at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    fn encode_document(&self, path: &Path) -> Result<Vec<EncodedPage>> {
        let (file_name, document) = Self::read_document(path)?;
        debug!("Encoding document {} ({} bytes b64)", file_name, document.len());

        let response: EncodeDocumentResponse = self.post_json(
            "/encode/document",
            &EncodeDocumentRequest {
                model: &self.model,
                file_name: &file_name,
                document,
            },
        )?;

        let pages = response
            .pages
            .into_iter()
            .enumerate()
            .map(|(page_num, page)| {
                let image = STANDARD.decode(page.image.as_bytes()).with_context(|| {
                    format!("Page {} of {} has an invalid image payload", page_num, file_name)
                })?;
                Ok(EncodedPage {
                    image,
                    embedding: page.embedding,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Encoded {} pages from {}", pages.len(), file_name);
        Ok(pages)
    }

    #[inline]
    fn encode_query(&self, query: &str) -> Result<Vec<f32>> {
        debug!("Encoding query (length: {})", query.len());

        let response: EncodeQueryResponse = self.post_json(
            "/encode/query",
            &EncodeQueryRequest {
                model: &self.model,
                query,
            },
        )?;

        if response.embedding.is_empty() {
            return Err(anyhow::anyhow!("Encoder returned an empty query embedding"));
        }

        debug!(
            "Generated query embedding with {} dimensions",
            response.embedding.len()
        );
        Ok(response.embedding)
    }

    #[inline]
    fn index_native(&self, index: &str, path: &Path) -> Result<usize> {
        let (file_name, document) = Self::read_document(path)?;
        debug!("Adding {} to native index {}", file_name, index);

        let response: IndexAddResponse = self.post_json(
            "/index/add",
            &IndexAddRequest {
                model: &self.model,
                index,
                file_name: &file_name,
                document,
            },
        )?;

        Ok(response.pages_indexed)
    }

    #[inline]
    fn native_search(&self, index: &str, query: &str, k: usize) -> Result<Vec<NativeSearchResult>> {
        debug!("Native search on index {} for top {}", index, k);

        let response: SearchResponse = self.post_json(
            "/search",
            &SearchRequest {
                model: &self.model,
                index,
                query,
                k,
            },
        )?;

        Ok(response.results)
    }
}
