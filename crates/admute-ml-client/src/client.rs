//! ML service HTTP client.

use std::time::Duration;

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::types::{
    Classification, ClassifyRequest, ClassifyResponse, HealthResponse, TranscribeRequest,
    TranscribeResponse,
};
use admute_models::TranscriptWord;

/// Configuration for ML client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of ML service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
    /// Ad probability above which a text is classified as an ad
    pub ad_threshold: f32,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            ad_threshold: 0.8,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ML_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            ad_threshold: std::env::var("ADMUTE_AD_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.8),
        }
    }
}

/// Client for the speech recognition and ad classification service.
#[derive(Debug, Clone)]
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
}

impl MlClient {
    /// Create a new ML client.
    pub fn new(config: MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(MlClientConfig::from_env())
    }

    pub fn config(&self) -> &MlClientConfig {
        &self.config
    }

    /// Check if ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Recognize words in mono f32 audio.
    pub async fn transcribe_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> MlResult<Vec<TranscriptWord>> {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let request = TranscribeRequest {
            sample_rate,
            audio: base64::engine::general_purpose::STANDARD.encode(bytes),
        };

        let response: TranscribeResponse = self.post_json("transcribe", &request).await?;
        debug!(words = response.words.len(), "Transcription received");
        Ok(response.words)
    }

    /// Classify a text as ad / not ad.
    pub async fn classify_text(&self, text: &str) -> MlResult<Classification> {
        let request = ClassifyRequest {
            text: text.to_string(),
        };
        let response: ClassifyResponse = self.post_json("classify", &request).await?;
        interpret_probabilities(&response.probabilities, self.config.ad_threshold)
    }

    /// POST a JSON body and decode a JSON reply, with retries.
    async fn post_json<Req, Resp>(&self, endpoint: &str, request: &Req) -> MlResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.config.base_url, endpoint);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| self.map_transport_error(e))?;

                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                if status == StatusCode::SERVICE_UNAVAILABLE || status.is_server_error() {
                    Err(MlError::ServiceUnavailable(format!("{}: {}", status, body)))
                } else {
                    Err(MlError::RequestFailed(format!(
                        "ML service returned {}: {}",
                        status, body
                    )))
                }
            })
            .await?;

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| MlError::InvalidResponse(format!("{} reply: {}", endpoint, e)))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> MlError {
        if e.is_timeout() {
            MlError::Timeout(self.config.timeout.as_secs())
        } else {
            MlError::Network(e)
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(200 * 2u64.pow(attempt));
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MlError::RequestFailed("Unknown error".to_string())))
    }
}

/// Turn a `[not_ad, ad]` probability vector into a decision.
pub fn interpret_probabilities(probabilities: &[f32], threshold: f32) -> MlResult<Classification> {
    let ad_probability = match probabilities {
        [_, ad, ..] if ad.is_finite() => ad.clamp(0.0, 1.0),
        _ => {
            return Err(MlError::InvalidResponse(format!(
                "expected [not_ad, ad] probabilities, got {:?}",
                probabilities
            )))
        }
    };

    Ok(Classification {
        is_ad: ad_probability > threshold,
        confidence: ad_probability,
    })
}
