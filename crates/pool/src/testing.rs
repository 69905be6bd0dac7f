//! In-memory recognizer doubles
//!
//! [`ScriptedRecognizerFactory`] builds [`ScriptedRecognizer`]s that share one
//! script, so a test can steer every worker in a pool and inspect what
//! happened afterwards. The soak runner uses the same doubles to simulate an
//! engine with latency and failures.
//!
//! # Example
//!
//! ```
//! use lumen_pool::testing::{Behavior, ScriptedRecognizerFactory};
//! use std::time::Duration;
//!
//! let factory = ScriptedRecognizerFactory::new();
//! factory.set_behavior(Behavior::echo_after(Duration::from_millis(50)));
//! factory.push_behavior(Behavior::fail("first call fails"));
//! factory.fail_next_creations(1);
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::recognizer::{
    BoundingBox, ImagePayload, Recognizer, RecognizerError, RecognizerFactory, TextRegion,
};

/// How a scripted recognizer answers one call
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Return the payload bytes as (lossy UTF-8) text
    Echo { latency: Duration },
    /// Return fixed text
    Succeed { text: String, latency: Duration },
    /// Reject with a retryable error
    Fail { message: String, latency: Duration },
    /// Reject with a non-retryable error
    FailPermanently { message: String },
    /// Never settle until cancelled
    Hang,
}

impl Default for Behavior {
    fn default() -> Self {
        Self::Echo {
            latency: Duration::ZERO,
        }
    }
}

impl Behavior {
    pub fn echo_after(latency: Duration) -> Self {
        Self::Echo { latency }
    }

    pub fn succeed(text: impl Into<String>) -> Self {
        Self::Succeed {
            text: text.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            latency: Duration::ZERO,
        }
    }

    fn latency(&self) -> Duration {
        match self {
            Self::Echo { latency } | Self::Succeed { latency, .. } | Self::Fail { latency, .. } => {
                *latency
            }
            Self::FailPermanently { .. } | Self::Hang => Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Script {
    default_behavior: Mutex<Behavior>,
    queued: Mutex<VecDeque<Behavior>>,
    failing_payloads: Mutex<HashSet<Vec<u8>>>,
    creation_failures: AtomicUsize,
    creation_latency: Mutex<Duration>,
    termination_latency: Mutex<Duration>,
    languages: Mutex<Vec<String>>,
    created: AtomicUsize,
    terminated: AtomicUsize,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Script {
    fn next_behavior(&self, image: &ImagePayload) -> Behavior {
        if self.failing_payloads.lock().contains(image.as_bytes()) {
            return Behavior::fail("scripted payload failure");
        }
        if let Some(behavior) = self.queued.lock().pop_front() {
            return behavior;
        }
        self.default_behavior.lock().clone()
    }

    async fn run(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RecognizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let behavior = self.next_behavior(image);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(RecognizerError::new("cancelled"));
            }
            _ = tokio::time::sleep(behavior.latency()) => {}
        }

        match behavior {
            Behavior::Echo { .. } => Ok(String::from_utf8_lossy(image.as_bytes()).into_owned()),
            Behavior::Succeed { text, .. } => Ok(text),
            Behavior::Fail { message, .. } => Err(RecognizerError::new(message)),
            Behavior::FailPermanently { message } => Err(RecognizerError::non_retryable(message)),
            Behavior::Hang => {
                cancel.cancelled().await;
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(RecognizerError::new("cancelled"))
            }
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Recognizer driven by a shared [`Behavior`] script
pub struct ScriptedRecognizer {
    script: Arc<Script>,
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self {
            script: Arc::new(Script::default()),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RecognizerError> {
        self.script.run(image, cancel).await
    }

    async fn detect(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<Vec<TextRegion>, RecognizerError> {
        let text = self.script.run(image, cancel).await?;
        Ok(vec![TextRegion {
            text,
            confidence: 1.0,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 20.0,
            },
        }])
    }

    async fn terminate(&self) -> Result<(), RecognizerError> {
        let latency = *self.script.termination_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.script.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory for [`ScriptedRecognizer`]s sharing one script
#[derive(Clone, Default)]
pub struct ScriptedRecognizerFactory {
    script: Arc<Script>,
}

impl ScriptedRecognizerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for every call not covered by a queued behavior
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.script.default_behavior.lock() = behavior;
    }

    /// Behavior for the next single call (FIFO)
    pub fn push_behavior(&self, behavior: Behavior) {
        self.script.queued.lock().push_back(behavior);
    }

    /// Every call with exactly these payload bytes fails
    pub fn fail_payload(&self, bytes: impl Into<Vec<u8>>) {
        self.script.failing_payloads.lock().insert(bytes.into());
    }

    /// The next `count` recognizer constructions fail
    pub fn fail_next_creations(&self, count: usize) {
        self.script.creation_failures.store(count, Ordering::SeqCst);
    }

    /// Delay applied to every recognizer construction
    pub fn set_creation_latency(&self, latency: Duration) {
        *self.script.creation_latency.lock() = latency;
    }

    /// Delay applied to every recognizer teardown
    pub fn set_termination_latency(&self, latency: Duration) {
        *self.script.termination_latency.lock() = latency;
    }

    pub fn created(&self) -> usize {
        self.script.created.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.script.terminated.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.script.cancelled.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.script.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Languages requested from the factory, in order
    pub fn languages(&self) -> Vec<String> {
        self.script.languages.lock().clone()
    }
}

#[async_trait]
impl RecognizerFactory for ScriptedRecognizerFactory {
    async fn create(&self, language: &str) -> Result<Arc<dyn Recognizer>, RecognizerError> {
        self.script.languages.lock().push(language.to_string());

        let latency = *self.script.creation_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .script
            .creation_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RecognizerError::new(format!(
                "failed to load language data for {language}"
            )));
        }

        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedRecognizer {
            script: Arc::clone(&self.script),
        }))
    }
}
