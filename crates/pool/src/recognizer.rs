//! Recognizer collaborator interface
//!
//! The pool never runs text recognition itself. It owns a set of
//! [`Recognizer`] instances built by a [`RecognizerFactory`] and schedules
//! work onto them. Construction and teardown are asynchronous and may fail.
//!
//! Every operation receives a [`CancellationToken`]. The pool cancels it when
//! an attempt times out, when the worker is removed or restarted, and on
//! shutdown. Implementations that hand work to a blocking thread should watch
//! the token and stop early.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Error reported by a recognizer or recognizer factory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognizerError {
    /// Error message
    pub message: String,

    /// Whether the pool may retry the task after this error
    ///
    /// Non-retryable errors fail the task on the first attempt.
    pub retryable: bool,
}

impl RecognizerError {
    /// Create a new retryable error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable error (e.g. undecodable image)
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RecognizerError {}

/// Encoded image bytes handed to a recognizer
///
/// Cloning is cheap; retries and concurrent attempts share one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload(Arc<[u8]>);

impl ImagePayload {
    /// Wrap raw encoded image bytes (PNG, JPEG, ...)
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    /// Decode a standard base64 string, as produced by the capture layer
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ImagePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A positioned piece of recognized text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextRegion {
    pub text: String,
    /// Recognition confidence in `0.0..=1.0`
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Result of a completed task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecognitionOutput {
    /// Plain text from a recognize task
    Text(String),
    /// Positioned regions from a detect task
    Regions(Vec<TextRegion>),
}

impl RecognitionOutput {
    /// Text content, joining detected regions with newlines
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Regions(regions) => regions
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Detected regions, if this is a detect result
    pub fn into_regions(self) -> Option<Vec<TextRegion>> {
        match self {
            Self::Regions(regions) => Some(regions),
            Self::Text(_) => None,
        }
    }
}

/// An expensive, reusable text recognition engine instance
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize all text in the image
    async fn recognize(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RecognizerError>;

    /// Detect positioned text regions in the image
    async fn detect(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<Vec<TextRegion>, RecognizerError>;

    /// Release the engine's resources
    async fn terminate(&self) -> Result<(), RecognizerError>;
}

/// Builds [`Recognizer`] instances for the pool
#[async_trait]
pub trait RecognizerFactory: Send + Sync {
    /// Construct a recognizer for the given language
    async fn create(&self, language: &str) -> Result<Arc<dyn Recognizer>, RecognizerError>;
}
