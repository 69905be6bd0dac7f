//! Soak runner for the recognition pool
//!
//! Drives a pool backed by a simulated engine with jittered latency and a
//! configurable failure rate, then prints a JSON report.
//!
//! Configure via environment variables:
//! - `SOAK_TASKS`: tasks to submit (default: 200)
//! - `SOAK_FAILURE_RATE`: probability a single call fails, 0.0-1.0 (default: 0.05)
//! - `SOAK_LATENCY_MS`: mean recognizer latency (default: 40)
//! - `LUMEN_POOL_*`: pool configuration, see `PoolConfig::from_env`
//! - `RUST_LOG` or `LOG_LEVEL`: log filter

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;

use lumen_pool::prelude::*;
use lumen_pool::telemetry::{init_tracing, TelemetryConfig};
use lumen_pool::{BoundingBox, TaskResult};

#[derive(Debug, Clone, Serialize)]
struct Scenario {
    tasks: usize,
    failure_rate: f64,
    latency_ms: u64,
}

impl Scenario {
    fn from_env() -> Result<Self> {
        let tasks = env_or("SOAK_TASKS", 200)?;
        let failure_rate: f64 = env_or("SOAK_FAILURE_RATE", 0.05)?;
        let latency_ms = env_or("SOAK_LATENCY_MS", 40)?;
        anyhow::ensure!(
            (0.0..=1.0).contains(&failure_rate),
            "SOAK_FAILURE_RATE must be between 0 and 1, got {failure_rate}"
        );
        Ok(Self {
            tasks,
            failure_rate,
            latency_ms,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        Err(_) => Ok(default),
    }
}

/// Engine stand-in: sleeps for a jittered latency, fails at random
struct SimulatedEngine {
    failure_rate: f64,
    latency: Duration,
}

impl SimulatedEngine {
    /// Latency for one call, and whether it fails
    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.5..1.5);
        (self.latency.mul_f64(jitter), rng.gen_bool(self.failure_rate))
    }

    async fn run(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RecognizerError> {
        let (latency, fails) = self.roll();
        tokio::select! {
            _ = cancel.cancelled() => return Err(RecognizerError::new("cancelled")),
            _ = tokio::time::sleep(latency) => {}
        }
        if fails {
            return Err(RecognizerError::new("simulated engine fault"));
        }
        Ok(format!("{} bytes recognized", image.len()))
    }
}

#[async_trait]
impl Recognizer for SimulatedEngine {
    async fn recognize(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RecognizerError> {
        self.run(image, cancel).await
    }

    async fn detect(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<Vec<TextRegion>, RecognizerError> {
        let text = self.run(image, cancel).await?;
        Ok(vec![TextRegion {
            text,
            confidence: 0.9,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.len() as f32,
                height: 16.0,
            },
        }])
    }

    async fn terminate(&self) -> Result<(), RecognizerError> {
        Ok(())
    }
}

struct SimulatedEngineFactory {
    scenario: Scenario,
}

#[async_trait]
impl RecognizerFactory for SimulatedEngineFactory {
    async fn create(&self, language: &str) -> Result<Arc<dyn Recognizer>, RecognizerError> {
        // Loading language data is the expensive part of a real engine
        tokio::time::sleep(Duration::from_millis(self.scenario.latency_ms * 2)).await;
        tracing::debug!(language, "Simulated engine loaded");
        Ok(Arc::new(SimulatedEngine {
            failure_rate: self.scenario.failure_rate,
            latency: Duration::from_millis(self.scenario.latency_ms),
        }))
    }
}

#[derive(Debug, Default, Serialize)]
struct Outcomes {
    succeeded: usize,
    exhausted_retries: usize,
    other_failures: usize,
}

impl Outcomes {
    fn tally(results: &[TaskResult]) -> Self {
        let mut outcomes = Self::default();
        for result in results {
            match result {
                Ok(_) => outcomes.succeeded += 1,
                Err(TaskError::ExhaustedRetries { .. }) => outcomes.exhausted_retries += 1,
                Err(_) => outcomes.other_failures += 1,
            }
        }
        outcomes
    }
}

#[derive(Debug, Serialize)]
struct SoakReport {
    scenario: Scenario,
    config: PoolConfig,
    elapsed_ms: u128,
    outcomes: Outcomes,
    metrics: PoolMetrics,
    workers: Vec<WorkerSnapshot>,
}

fn priority_for(index: usize) -> Priority {
    match index % 10 {
        0 => Priority::Urgent,
        1 | 2 => Priority::High,
        3 => Priority::Low,
        _ => Priority::Normal,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut telemetry_config = TelemetryConfig::from_env().with_service_name("lumen-soak");
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("lumen_soak=info,lumen_pool=warn".to_string());
    }
    init_tracing(telemetry_config);

    let scenario = Scenario::from_env()?;
    let config = PoolConfig::from_env();
    tracing::info!(
        tasks = scenario.tasks,
        failure_rate = scenario.failure_rate,
        latency_ms = scenario.latency_ms,
        min_workers = config.min_workers,
        max_workers = config.max_workers,
        "Starting soak run"
    );

    let factory = Arc::new(SimulatedEngineFactory {
        scenario: scenario.clone(),
    });
    let pool = RecognitionPool::new(config.clone(), factory).context("Invalid pool configuration")?;
    pool.initialize()
        .await
        .context("Failed to initialize recognition pool")?;

    let started = Instant::now();
    let mut handles = Vec::with_capacity(scenario.tasks);
    for i in 0..scenario.tasks {
        let payload = ImagePayload::new(vec![0u8; 64 + i % 512]);
        let options = SubmitOptions::new().with_priority(priority_for(i));
        let handle = if i % 4 == 0 {
            pool.detect(payload, options)
        } else {
            pool.recognize(payload, options)
        }
        .context("Failed to submit task")?;
        handles.push(handle);
    }

    let results = tokio::select! {
        results = join_all(handles) => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            pool.shutdown().await;
            return Ok(());
        }
    };
    let elapsed = started.elapsed();

    let report = SoakReport {
        scenario,
        config,
        elapsed_ms: elapsed.as_millis(),
        outcomes: Outcomes::tally(&results),
        metrics: pool.metrics(),
        workers: pool.worker_states(),
    };

    pool.shutdown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    tracing::info!(elapsed_ms = report.elapsed_ms, "Soak run complete");
    Ok(())
}
