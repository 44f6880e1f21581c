//! Client for the Python speech recognition and ad classification service.
//!
//! The service exposes `/transcribe` (word-timestamped ASR over base64
//! f32le PCM), `/classify` (`[not_ad, ad]` probabilities for a text) and
//! `/health`. The worker depends only on the [`Transcriber`] and
//! [`Classifier`] seams, which [`MlClient`] implements.

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::{interpret_probabilities, MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use service::{Classifier, Transcriber};
pub use types::Classification;
