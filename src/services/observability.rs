use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One per-request stats record, emitted after completion.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatsRecord {
    pub request_id: String,
    /// First 12 hex chars of the fingerprint; enough to correlate, short
    /// enough to keep out of log-scraping trouble.
    pub fingerprint_prefix: String,
    pub tenant: String,
    pub dataset: String,
    pub engine: String,
    pub rows: usize,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub rls_applied: bool,
    pub rls_bypassed: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One-way stats emission. Delivery is best-effort: implementations must
/// never fail the request they describe.
pub trait StatsSink: Send + Sync {
    fn emit(&self, record: QueryStatsRecord);
}

/// Aggregate counters over everything emitted so far.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_queries: u64,
    pub total_errors: u64,
    pub cache_hits: u64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_duration_ms: u64,
}

/// Default sink: structured log line per query plus a bounded ring of
/// recent records for the analytics surface.
pub struct RecordingStatsSink {
    recent: Mutex<VecDeque<QueryStatsRecord>>,
    capacity: usize,
    total: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    duration_total_ms: AtomicU64,
}

impl RecordingStatsSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            duration_total_ms: AtomicU64::new(0),
        }
    }

    /// Most recent records, newest first. Non-admin callers pass their
    /// tenant so they only see their own traffic.
    pub fn recent(&self, limit: usize, tenant: Option<&str>) -> Vec<QueryStatsRecord> {
        let guard = self.recent.lock().expect("stats ring poisoned");
        guard
            .iter()
            .rev()
            .filter(|r| tenant.map_or(true, |t| r.tenant == t))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> StatsSummary {
        let total = self.total.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let duration_total = self.duration_total_ms.load(Ordering::Relaxed);
        StatsSummary {
            total_queries: total,
            total_errors: errors,
            cache_hits,
            error_rate: if total > 0 { errors as f64 / total as f64 } else { 0.0 },
            cache_hit_rate: if total > 0 { cache_hits as f64 / total as f64 } else { 0.0 },
            avg_duration_ms: if total > 0 { duration_total / total } else { 0 },
        }
    }
}

impl Default for RecordingStatsSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatsSink for RecordingStatsSink {
    fn emit(&self, record: QueryStatsRecord) {
        tracing::info!(
            fingerprint = %record.fingerprint_prefix,
            tenant = %record.tenant,
            dataset = %record.dataset,
            engine = %record.engine,
            rows = record.rows,
            duration_ms = record.duration_ms,
            cache_hit = record.cache_hit,
            rls_applied = record.rls_applied,
            rls_bypassed = record.rls_bypassed,
            success = record.success,
            "query completed"
        );

        self.total.fetch_add(1, Ordering::Relaxed);
        if !record.success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if record.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.duration_total_ms.fetch_add(record.duration_ms, Ordering::Relaxed);

        let mut guard = self.recent.lock().expect("stats ring poisoned");
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(record);
    }
}
