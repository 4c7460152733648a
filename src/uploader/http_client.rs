use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{multipart, Client};
use serde_json::Value;
use std::cmp::min;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::UploaderConfig;
use crate::errors::{AppError, AppResult};
use crate::token::TokenProvider;

/// Size of the body slices handed to the transport; each slice is one telemetry sample
const TELEMETRY_CHUNK_BYTES: usize = 64 * 1024;

/// `(bytes_written, bytes_expected)` callback fed by the request body stream
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

/// One file inside a multipart payload
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Multipart POST to a single URL
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub parts: Vec<FilePart>,
}

impl UploadRequest {
    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.data.len() as u64).sum()
    }
}

/// Sends upload requests. Implementations return the raw body of a 2xx
/// response and an error for anything else.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_multipart(
        &self,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> AppResult<String>;
}

/// Parsed body of a successful upload.
///
/// Bodies that are not JSON are kept as a JSON string so that a completed
/// upload is never discarded over formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub body: Value,
    pub lenient: bool,
}

impl UploadResponse {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(body) => Self {
                body,
                lenient: false,
            },
            Err(e) => {
                log::warn!(
                    "Upload response is not JSON ({}), keeping raw body: {}",
                    e,
                    &raw[..raw.char_indices().nth(200).map_or(raw.len(), |(i, _)| i)]
                );
                Self {
                    body: Value::String(raw.to_string()),
                    lenient: true,
                }
            }
        }
    }

    /// URL for the asset at `index` within the unit: `files[index].url`, then
    /// `urls[index]`, then the top-level `url`, then the raw body itself.
    pub fn remote_url_for(&self, index: usize) -> Option<String> {
        let from_files = self
            .body
            .get("files")
            .and_then(|files| files.get(index))
            .and_then(|file| file.get("url").or(Some(file)))
            .and_then(Value::as_str);
        let from_urls = self
            .body
            .get("urls")
            .and_then(|urls| urls.get(index))
            .and_then(Value::as_str);
        let top_level = self.body.get("url").and_then(Value::as_str);
        let raw = self.body.as_str().map(str::trim).filter(|s| !s.is_empty());

        from_files
            .or(from_urls)
            .or(top_level)
            .or(raw)
            .map(str::to_string)
    }
}

/// HTTP transport for the upload endpoint
pub struct UploadClient {
    client: Client,
    token_provider: Arc<dyn TokenProvider>,
    token_key: String,
    extra_headers: HashMap<String, String>,
    retry_config: RetryConfig,
}

impl UploadClient {
    pub fn new(config: &UploaderConfig, token_provider: Arc<dyn TokenProvider>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            token_provider,
            token_key: config.token_key.clone(),
            extra_headers: config.extra_headers.clone(),
            retry_config: RetryConfig {
                max_retries: config.max_retry_attempts,
                ..RetryConfig::default()
            },
        })
    }

    /// Headers for one attempt. The token is looked up on every call so a
    /// rotated credential is picked up by the next request.
    pub fn request_headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (key, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| AppError::validation("extra_headers", &e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::validation("extra_headers", &e.to_string()))?;
            headers.insert(name, value);
        }

        match self.token_provider.get_token(&self.token_key) {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| AppError::validation("token", &e.to_string()))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => log::warn!("No token found for key '{}', sending unauthenticated", self.token_key),
        }

        Ok(headers)
    }

    fn build_form(request: &UploadRequest, on_progress: &ProgressCallback) -> AppResult<multipart::Form> {
        let expected = request.total_bytes();
        let written = Arc::new(AtomicU64::new(0));
        let mut form = multipart::Form::new();

        for file in &request.parts {
            let length = file.data.len() as u64;
            let body = progress_body(file.data.clone(), written.clone(), expected, on_progress.clone());
            let part = multipart::Part::stream_with_length(body, length)
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)?;

            form = form.part(file.field_name.clone(), part);
        }

        Ok(form)
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.retry_config.base_delay.as_millis() as f64
            * self.retry_config.exponential_base.powi(attempt as i32 - 1);

        min(Duration::from_millis(delay_ms as u64), self.retry_config.max_delay)
    }
}

#[async_trait]
impl Transport for UploadClient {
    async fn post_multipart(
        &self,
        request: UploadRequest,
        on_progress: ProgressCallback,
    ) -> AppResult<String> {
        let mut attempt = 0;

        loop {
            let form = Self::build_form(&request, &on_progress)?;
            let headers = self.request_headers()?;

            log::debug!(
                "POST {} ({} parts, {} bytes, attempt {})",
                request.url,
                request.parts.len(),
                request.total_bytes(),
                attempt + 1
            );

            let (error, retry_after) = match self
                .client
                .post(&request.url)
                .headers(headers)
                .multipart(form)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<f64>().ok())
                        .map(Duration::from_secs_f64);

                    if status.is_success() {
                        let text = response.text().await?;
                        log::debug!(
                            "Upload response from {} ({} bytes)",
                            request.url,
                            text.len()
                        );
                        return Ok(text);
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    let message = extract_error_message(&error_text).unwrap_or_default();
                    (AppError::upload_failed(status.as_u16(), &message), retry_after)
                }
                Err(e) => (AppError::Network(e), None),
            };

            attempt += 1;
            if error.is_retryable() && attempt <= self.retry_config.max_retries {
                let delay = retry_after.unwrap_or_else(|| self.calculate_backoff_delay(attempt));
                log::warn!(
                    "Upload attempt {} to {} failed, retrying in {:?}: {}",
                    attempt,
                    request.url,
                    delay,
                    error
                );
                sleep(delay).await;
                continue;
            }

            log::warn!("Upload to {} failed: {}", request.url, error);
            return Err(error);
        }
    }
}

/// Body stream that reports cumulative bytes as the transport pulls each slice
fn progress_body(
    data: Bytes,
    written: Arc<AtomicU64>,
    expected: u64,
    on_progress: ProgressCallback,
) -> reqwest::Body {
    reqwest::Body::wrap_stream(telemetry_stream(data, written, expected, on_progress))
}

fn telemetry_stream(
    data: Bytes,
    written: Arc<AtomicU64>,
    expected: u64,
    on_progress: ProgressCallback,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let slices: Vec<Bytes> = (0..data.len())
        .step_by(TELEMETRY_CHUNK_BYTES)
        .map(|start| data.slice(start..min(start + TELEMETRY_CHUNK_BYTES, data.len())))
        .collect();

    futures::stream::iter(slices.into_iter().map(move |slice| {
        let total = written.fetch_add(slice.len() as u64, Ordering::SeqCst) + slice.len() as u64;
        on_progress(total, expected);
        Ok(slice)
    }))
}

/// Pull a user-displayable message out of an error body (`{"error": "..."}`)
pub fn extract_error_message(error_body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(error_body).ok()?;
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
