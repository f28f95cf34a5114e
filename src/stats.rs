use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::{Mutex, MutexGuard};
use strum::IntoEnumIterator;
use thread_local::ThreadLocal;

use crate::operation::{OperationError, OperationKind, TaskOutcome};

const HISTOGRAM_PRECISION: u8 = 3;

/// Counters of a single operation kind.
pub struct OperationStats {
    pub operations: u64,
    pub errors: u64,
    pub skipped: u64,
    pub documents_written: u64,
    pub documents_failed: u64,
    /// Latencies of the successful operations, in microseconds.
    pub latency: Histogram<u64>,
}

impl OperationStats {
    fn new() -> Self {
        Self {
            operations: 0,
            errors: 0,
            skipped: 0,
            documents_written: 0,
            documents_failed: 0,
            // This cannot panic since 1 <= sigfig <= 5.
            latency: Histogram::new(HISTOGRAM_PRECISION).unwrap(),
        }
    }

    fn clear(&mut self) {
        self.operations = 0;
        self.errors = 0;
        self.skipped = 0;
        self.documents_written = 0;
        self.documents_failed = 0;
        self.latency.reset();
    }

    fn combine(&mut self, other: &Self) {
        self.operations += other.operations;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.documents_written += other.documents_written;
        self.documents_failed += other.documents_failed;
        if let Err(err) = self.latency.add(&other.latency) {
            tracing::warn!(error = %err, "failed to combine latency histograms");
        }
    }

    fn latency_ms(&self, quantile: f64) -> f64 {
        self.latency.value_at_quantile(quantile) as f64 * 1e-3
    }
}

/// Statistics of the operations performed by the workers.
pub struct Stats {
    per_kind: HashMap<OperationKind, OperationStats>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            per_kind: OperationKind::iter()
                .map(|kind| (kind, OperationStats::new()))
                .collect(),
        }
    }

    pub fn account_operation(
        &mut self,
        kind: OperationKind,
        latency: Duration,
        result: &Result<TaskOutcome, OperationError>,
    ) {
        let stats = self.get_mut(kind);
        stats.operations += 1;
        match result {
            Ok(TaskOutcome::Skipped) => {
                stats.skipped += 1;
            }
            Ok(outcome) => {
                stats.documents_written += outcome.documents_written() as u64;
                stats.documents_failed += outcome.documents_failed() as u64;
                stats
                    .latency
                    .saturating_record(latency.as_micros().try_into().unwrap_or(u64::MAX));
            }
            Err(_) => {
                stats.errors += 1;
            }
        }
    }

    pub fn get(&self, kind: OperationKind) -> Option<&OperationStats> {
        self.per_kind.get(&kind)
    }

    fn get_mut(&mut self, kind: OperationKind) -> &mut OperationStats {
        self.per_kind
            .entry(kind)
            .or_insert_with(OperationStats::new)
    }

    pub fn total_operations(&self) -> u64 {
        self.per_kind.values().map(|s| s.operations).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.per_kind.values().map(|s| s.errors).sum()
    }

    pub fn clear(&mut self) {
        self.per_kind.values_mut().for_each(OperationStats::clear);
    }

    pub fn combine(&mut self, other: &Self) {
        for (kind, other_stats) in &other.per_kind {
            self.get_mut(*kind).combine(other_stats);
        }
    }

    /// Logs a summary line per operation kind which was performed at least once.
    pub fn log_summary(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        for kind in OperationKind::iter() {
            let Some(stats) = self.get(kind).filter(|s| s.operations > 0) else {
                continue;
            };
            tracing::info!(
                operation = %kind,
                operations = stats.operations,
                errors = stats.errors,
                skipped = stats.skipped,
                documents_written = stats.documents_written,
                documents_failed = stats.documents_failed,
                op_rate = format_args!("{:.1}", stats.operations as f64 / secs),
                mean_ms = format_args!("{:.3}", stats.latency.mean() * 1e-3),
                p50_ms = format_args!("{:.3}", stats.latency_ms(0.5)),
                p99_ms = format_args!("{:.3}", stats.latency_ms(0.99)),
                max_ms = format_args!("{:.3}", stats.latency.max() as f64 * 1e-3),
                "operation summary",
            );
        }
        tracing::info!(
            operations = self.total_operations(),
            errors = self.total_errors(),
            elapsed = ?elapsed,
            "run summary",
        );
    }
}

/// A sharded statistics structure.
///
/// Each thread accounts its operations in a separate instance of [`Stats`],
/// protected by its own mutex. As the combined stats are read infrequently,
/// the mutexes are uncontended most of the time.
#[derive(Default)]
pub struct ShardedStats {
    shards: ThreadLocal<Arc<Mutex<Stats>>>,
    all: Mutex<Vec<Arc<Mutex<Stats>>>>,
}

impl ShardedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets and locks access to this thread's stats.
    pub fn get_shard_mut(&self) -> MutexGuard<'_, Stats> {
        self.shards
            .get_or(|| {
                let shard = Arc::new(Mutex::new(Stats::new()));
                self.all.lock().push(Arc::clone(&shard));
                shard
            })
            .lock()
    }

    /// Combines the stats of all threads and clears the per-thread stats.
    pub fn get_combined_and_clear(&self) -> Stats {
        let mut combined = Stats::new();
        for shard in self.all.lock().iter() {
            let mut shard = shard.lock();
            combined.combine(&shard);
            shard.clear();
        }
        combined
    }
}
