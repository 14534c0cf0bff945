//! Vision-model client for a local Ollama server (`POST /api/generate`).

use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::response::parse_reply;
use super::{Classification, ModelClient};
use crate::config::ModelConfig;
use crate::error::{ClassificationError, ConfigError};

/// Default connect timeout for the model server.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum length of an error body carried into an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub const DEFAULT_PROMPT: &str = "Look at this image and describe it for a photo library.
Reply with ONLY a JSON object of the form
{\"description\": \"one sentence describing the image\",
 \"category\": \"a single broad category such as Nature, People, Animals, City, Food, Documents\",
 \"confidence\": a number between 0 and 1}";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}

/// Blocking HTTP client for Ollama's generate endpoint.
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
    prompt: String,
    request_timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl OllamaClient {
    /// Creates a client for `endpoint` (server base URL or full
    /// `/api/generate` URL) and `model`.
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: generate_url(endpoint),
            model: model.into(),
            prompt: DEFAULT_PROMPT.to_string(),
            request_timeout,
            retries: 0,
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self, ConfigError> {
        let mut client = Self::new(
            &config.endpoint,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_retries(config.retries, Duration::from_millis(config.retry_delay_ms));
        if let Some(ref prompt) = config.prompt {
            client.prompt = prompt.clone();
        }
        Ok(client)
    }

    /// Retries connection failures and server errors `retries` more times.
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn attempt(&self, encoded: &str) -> Result<Classification, ClassificationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![encoded.to_string()],
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = format!("HTTP {}: {}", status, truncate_body(&body));
            return Err(if status.is_server_error() {
                ClassificationError::Unreachable(message)
            } else {
                ClassificationError::MalformedResponse(message)
            });
        }

        let body: GenerateResponse = response
            .json()
            .map_err(|e| self.map_body_error(e))?;
        parse_reply(&body.response)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassificationError {
        if e.is_timeout() {
            ClassificationError::Timeout(self.request_timeout)
        } else {
            ClassificationError::Unreachable(format!("{}: {}", self.url, e))
        }
    }

    fn map_body_error(&self, e: reqwest::Error) -> ClassificationError {
        if e.is_timeout() {
            ClassificationError::Timeout(self.request_timeout)
        } else {
            ClassificationError::MalformedResponse(format!("invalid generate response: {}", e))
        }
    }
}

impl ModelClient for OllamaClient {
    fn classify(
        &self,
        image: &[u8],
        format_hint: Option<&str>,
    ) -> Result<Classification, ClassificationError> {
        debug!(
            "Classifying {} byte(s) ({}) with {}",
            image.len(),
            format_hint.unwrap_or("unknown format"),
            self.model
        );
        let encoded = BASE64.encode(image);

        let mut attempt = 0;
        loop {
            match self.attempt(&encoded) {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Model call failed ({}), retrying ({} of {})",
                        e, attempt, self.retries
                    );
                    thread::sleep(self.retry_delay);
                }
                result => return result,
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn generate_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("/api/generate") {
        base.to_string()
    } else {
        format!("{}/api/generate", base)
    }
}
