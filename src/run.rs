use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::configuration::{Configuration, Operation, OperationContext, OperationFactory};

// Rate limits operations by issuing timestamps indicating when the next
// operation should happen. Uses atomics, can be shared between threads.
struct RateLimiter {
    base: Instant,
    increment_nanos: u64,
    nanos_counter: AtomicU64,
}

impl RateLimiter {
    pub fn new(base: Instant, ops_per_second: f64) -> Self {
        let increment_nanos = (1_000_000_000f64 / ops_per_second) as u64;
        Self {
            base,
            increment_nanos,
            nanos_counter: AtomicU64::new(0),
        }
    }

    pub fn issue_next_start_time(&self) -> Instant {
        let nanos = self
            .nanos_counter
            .fetch_add(self.increment_nanos, Ordering::Relaxed);

        self.base + Duration::from_nanos(nanos)
    }
}

// When an operation ID equal or larger to this value is issued, the worker
// stops itself. `ask_to_stop` sets the counter to this value. It is large
// enough to never be reached by regular operations, and small enough for
// the attempts made after `ask_to_stop` not to overflow the counter.
const INVALID_OP_ID_THRESHOLD: u64 = 1u64 << 63u64;

// Shareable state and configuration of the workers.
struct WorkerContext {
    operation_counter: AtomicU64,
    operation_factory: Arc<dyn OperationFactory>,

    rate_limiter: Option<RateLimiter>,
}

impl WorkerContext {
    pub fn new(config: &Configuration, now: Instant) -> Self {
        Self {
            operation_counter: AtomicU64::new(0),
            operation_factory: Arc::clone(&config.operation_factory),

            rate_limiter: config
                .rate_limit_per_second
                .map(|rate| RateLimiter::new(now, rate)),
        }
    }

    // Prevents more operations from being issued
    pub fn ask_to_stop(&self) {
        self.operation_counter
            .store(INVALID_OP_ID_THRESHOLD, Ordering::Relaxed);
    }

    // Issues the next operation id. Returns `None` after `ask_to_stop`.
    fn issue_operation_id(&self) -> Option<u64> {
        let id = self.operation_counter.fetch_add(1, Ordering::Relaxed);
        (id < INVALID_OP_ID_THRESHOLD).then_some(id)
    }

    // Creates and prepares a new operation, runs it until it is asked to stop
    // or until it returns `Err` or `ControlFlow::Break`, then finishes it.
    pub async fn run_worker(&self) -> Result<()> {
        let mut operation = self.operation_factory.create()?;
        operation.prepare().await?;

        let result = self.run_loop(operation.as_mut()).await;
        operation.finish().await;
        result
    }

    async fn run_loop(&self, operation: &mut dyn Operation) -> Result<()> {
        while let Some(op_id) = self.issue_operation_id() {
            let scheduled_start_time = match &self.rate_limiter {
                Some(rate_limiter) => {
                    let start_time = rate_limiter.issue_next_start_time();
                    tokio::time::sleep_until(start_time).await;
                    Some(start_time)
                }
                None => None,
            };

            let actual_start_time = Instant::now();
            let ctx = OperationContext {
                operation_id: op_id,
                scheduled_start_time: scheduled_start_time.unwrap_or(actual_start_time),
                actual_start_time,
            };

            if let ControlFlow::Break(_) = operation.execute(&ctx).await? {
                break;
            }
        }

        Ok(())
    }
}

/// Allows stopping a run from outside.
pub struct RunController {
    ctx: Arc<WorkerContext>,
    abort_handles: Vec<AbortHandle>,
}

impl RunController {
    /// Asks the workers to finish their current operations and stop.
    pub fn ask_to_stop(&self) {
        self.ctx.ask_to_stop();
    }

    /// Cancels the workers immediately, without finishing them.
    pub fn abort(&self) {
        self.ctx.ask_to_stop();
        for handle in &self.abort_handles {
            handle.abort();
        }
    }
}

/// Spawns the workers and returns a controller and a future which resolves
/// when all workers have stopped. The first worker error stops the others
/// and is returned by the future.
///
/// This includes errors from `OperationFactory::create` and
/// `Operation::prepare`: a worker which cannot provision its collection
/// ends the whole run rather than leaving the remaining workers to run
/// at reduced concurrency. Errors of single operations are handled by the
/// operation itself and don't reach this level.
///
/// Must be called from within a tokio runtime.
pub fn run(config: Configuration) -> (RunController, impl Future<Output = Result<()>>) {
    let start_time = Instant::now();
    let ctx = Arc::new(WorkerContext::new(&config, start_time));

    let mut abort_handles = Vec::new();
    let mut worker_handles = (0..config.concurrency)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let handle = tokio::task::spawn(async move { ctx.run_worker().await });
            abort_handles.push(handle.abort_handle());
            handle
        })
        .collect::<FuturesUnordered<_>>();

    // If there is a time limit, stop the workers after it elapses.
    let stopper_ctx = Arc::clone(&ctx);
    let stopper_handle = config.max_duration.map(move |duration| {
        let (fut, handle) = async move {
            tokio::time::sleep_until(start_time + duration).await;
            stopper_ctx.ask_to_stop();
        }
        .remote_handle();
        tokio::task::spawn(fut);
        handle
    });

    let controller = RunController {
        ctx: Arc::clone(&ctx),
        abort_handles,
    };

    let finished = async move {
        let _stopper_handle = stopper_handle;
        let mut result: Result<()> = Ok(());

        while let Some(worker_result) = worker_handles.next().await {
            let worker_result = worker_result
                .context("worker task did not complete")
                .and_then(|r| r);
            if let Err(err) = worker_result {
                tracing::error!(error = %err, "worker failed, stopping the run");
                if result.is_ok() {
                    result = Err(err);
                }
                ctx.ask_to_stop();
            }
        }

        result
    };

    (controller, finished)
}
