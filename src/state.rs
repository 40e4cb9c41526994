//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Thread Safety Pattern:
//! - `config` and `metrics` use `Arc<RwLock<T>>`: many readers, one writer.
//! - `orchestrator` is immutable once built and shared as `Arc`. It owns the
//!   model registries, which do their own locking.
//! - Pipeline outcome counters are atomics, so recording one never blocks a request.

use crate::config::AppConfig;
use crate::pipeline::{PipelineOrchestrator, PipelineResult, ReferenceSettings};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Effective configuration. Only the runtime-tunable parts ever change.
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP request metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub pipeline_counters: Arc<PipelineCounters>,

    pub orchestrator: Arc<PipelineOrchestrator>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Key: endpoint name (e.g., "POST /api/v1/translate-audio")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

/// Outcomes of full pipeline runs.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    completed: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineCountsSnapshot {
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
}

impl PipelineCounters {
    /// Count a pipeline that returned a result, complete or partial.
    pub fn record(&self, result: &PipelineResult) {
        if result.is_partial() {
            self.partial.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a pipeline that aborted with an error.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineCountsSnapshot {
        PipelineCountsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// A poisoned lock still holds valid data here: every writer replaces whole
/// values or bumps counters.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline_counters: Arc::new(PipelineCounters::default()),
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Validate and store `new_config`, then push the runtime-tunable
    /// settings into the orchestrator.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        self.orchestrator
            .update_reference_settings(ReferenceSettings::from_config(&new_config));
        *write(&self.config) = new_config;
        Ok(())
    }

    /// Current per-file upload limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        read(&self.config).performance.max_upload_bytes()
    }

    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    /// Record one request against `endpoint` (e.g. "GET /api/v1/models").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Clone the metrics so the lock isn't held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backends::ModelRegistries;
    use crate::pipeline::PipelineSettings;
    use crate::testing::{MockSynthesizer, MockTranscriber, MockTranslator};

    /// App state over mock capabilities, with artifacts and staging under `root`.
    pub fn mock_state(
        root: &std::path::Path,
        transcriber: MockTranscriber,
        translator: MockTranslator,
        synthesizer: MockSynthesizer,
    ) -> AppState {
        let mut config = AppConfig::default();
        config.models.whisper_model = "tiny".to_string();
        config.pipeline.output_dir = root.join("outputs");
        config.pipeline.staging_dir = Some(root.join("staging"));

        let registries = ModelRegistries::new(
            Arc::new(transcriber).registry(),
            Arc::new(translator).registry(),
            Arc::new(synthesizer).registry(),
        );
        let settings = PipelineSettings::from_config(&config).unwrap();
        let orchestrator = Arc::new(PipelineOrchestrator::new(registries, settings));
        AppState::new(config, orchestrator)
    }
}
