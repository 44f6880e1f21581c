//! ML service request/response types.

use admute_models::TranscriptWord;
use serde::{Deserialize, Serialize};

/// Request for speech recognition of one audio buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeRequest {
    /// Sample rate of `audio`
    pub sample_rate: u32,
    /// Base64 of mono little-endian f32 samples
    pub audio: String,
}

/// Recognized words, in spoken order.
///
/// An empty list means "no speech" and is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResponse {
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

/// Request for ad classification of one text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

/// Raw classifier output: softmax probabilities `[not_ad, ad]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    #[serde(default)]
    pub probabilities: Vec<f32>,
}

/// Ad/not-ad decision for one text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_ad: bool,
    /// Probability that the text is an ad, in `[0, 1]`
    pub confidence: f32,
}

impl Classification {
    /// A negative decision with zero confidence.
    pub fn not_ad() -> Self {
        Self {
            is_ad: false,
            confidence: 0.0,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
