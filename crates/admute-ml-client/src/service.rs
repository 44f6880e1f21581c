//! Narrow service seams used by the worker pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use admute_models::TranscriptWord;

use crate::client::MlClient;
use crate::error::MlResult;
use crate::types::Classification;

/// Speech recognition with word timestamps.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Recognize words in mono f32 audio. Word times are relative to the
    /// first sample.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> MlResult<Vec<TranscriptWord>>;
}

/// Binary ad / not-ad text classification.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> MlResult<Classification>;
}

#[async_trait]
impl Transcriber for MlClient {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> MlResult<Vec<TranscriptWord>> {
        self.transcribe_samples(samples, sample_rate).await
    }
}

#[async_trait]
impl Classifier for MlClient {
    async fn classify(&self, text: &str) -> MlResult<Classification> {
        self.classify_text(text).await
    }
}

#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> MlResult<Vec<TranscriptWord>> {
        (**self).transcribe(samples, sample_rate).await
    }
}

#[async_trait]
impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    async fn classify(&self, text: &str) -> MlResult<Classification> {
        (**self).classify(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MlClientConfig;
    use crate::error::MlError;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, max_retries: u32) -> MlClient {
        MlClient::new(MlClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries,
            ad_threshold: 0.8,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_classify_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .and(body_partial_json(serde_json::json!({"text": "buy now"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"probabilities": [0.05, 0.95]})),
            )
            .mount(&server)
            .await;

        let client: Arc<dyn Classifier> = Arc::new(client_for(&server, 0));
        let result = client.classify("buy now").await.unwrap();
        assert!(result.is_ad);
        assert!((result.confidence - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_classify_short_probabilities_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"probabilities": [1.0]})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 0).classify("hello").await.unwrap_err();
        assert!(matches!(err, MlError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_transcribe_sends_base64_pcm() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .and(body_partial_json(serde_json::json!({
                "sample_rate": 16000,
                // two f32 zeros
                "audio": "AAAAAAAAAAA="
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "words": [
                    {"word": "hello", "start": 0.1, "end": 0.4},
                    {"word": "world", "start": 0.5, "end": 0.9}
                ]
            })))
            .mount(&server)
            .await;

        let words = client_for(&server, 0)
            .transcribe(&[0.0, 0.0], 16000)
            .await
            .unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].word, "world");
    }

    #[tokio::test]
    async fn test_retries_on_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, 2).classify("x").await.unwrap_err();
        assert!(matches!(err, MlError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad text"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 2).classify("x").await.unwrap_err();
        assert!(matches!(err, MlError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ok", "version": "1.0"})),
            )
            .mount(&server)
            .await;

        assert!(client_for(&server, 0).health_check().await.unwrap());
    }
}
