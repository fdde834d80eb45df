//! Per-source check metrics
//!
//! Counts checks and classified failures for each source so the
//! presentation layer can show which sites are currently breaking.

use crate::error::{ErrorKind, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
    pub blocked_count: u64,
    pub not_found_count: u64,
    pub parse_failures: u64,
    pub anomalies: u64,
    pub timeout_count: u64,
    pub series_flagged: u64,
}

impl SourceMetrics {
    pub fn new(source_name: String) -> Self {
        Self {
            source_name,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
            blocked_count: 0,
            not_found_count: 0,
            parse_failures: 0,
            anomalies: 0,
            timeout_count: 0,
            series_flagged: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    pub fn record_failure(&mut self, error: &ScanError) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());

        match error.kind() {
            ErrorKind::Blocked => self.blocked_count += 1,
            ErrorKind::NotFound => self.not_found_count += 1,
            ErrorKind::Parse => self.parse_failures += 1,
            ErrorKind::Anomaly => self.anomalies += 1,
            ErrorKind::Fetch if matches!(error, ScanError::Fetch { timed_out: true, .. }) => {
                self.timeout_count += 1
            }
            _ => {}
        }
    }
}

pub struct MetricsTracker {
    metrics: Mutex<BTreeMap<String, SourceMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(BTreeMap::new()),
        }
    }

    fn with_source<T>(&self, source_name: &str, f: impl FnOnce(&mut SourceMetrics) -> T) -> T {
        let mut metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name.to_string()));
        f(source_metrics)
    }

    pub fn record_success(&self, source_name: &str, response_time: Duration) {
        let rate = self.with_source(source_name, |m| {
            m.record_success(response_time);
            m.success_rate()
        });
        log::debug!(
            "[{}] Success - Response time: {}ms - Success rate: {:.2}%",
            source_name,
            response_time.as_millis(),
            rate
        );
    }

    pub fn record_failure(&self, source_name: &str, error: &ScanError) {
        let rate = self.with_source(source_name, |m| {
            m.record_failure(error);
            m.success_rate()
        });
        log::warn!(
            "[{}] Failure - Error: {} - Success rate: {:.2}%",
            source_name,
            error,
            rate
        );
    }

    pub fn record_flagged(&self, source_name: &str) {
        self.with_source(source_name, |m| m.series_flagged += 1);
    }

    pub fn get_metrics(&self, source_name: &str) -> Option<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        metrics.get(source_name).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        metrics.values().cloned().collect()
    }

    pub fn export_json(&self) -> String {
        let metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
        serde_json::to_string_pretty(&*metrics).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Time an operation and record its outcome against `source_name`.
pub async fn track_request<F, T>(
    tracker: &MetricsTracker,
    source_name: &str,
    operation: F,
) -> Result<T, ScanError>
where
    F: std::future::Future<Output = Result<T, ScanError>>,
{
    let start = Instant::now();
    let result = operation.await;
    let duration = start.elapsed();

    match &result {
        Ok(_) => tracker.record_success(source_name, duration),
        Err(e) => tracker.record_failure(source_name, e),
    }

    result
}
