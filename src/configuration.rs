use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

/// Defines the configuration of a load test run.
pub struct Configuration {
    /// The maximum duration of the test.
    ///
    /// Depending on the workload, the test may finish earlier than
    /// the specified duration, but it will be immediately stopped if it lasts
    /// longer than `max_duration`.
    ///
    /// If `None`, the test duration is unlimited.
    pub max_duration: Option<Duration>,

    /// The number of simulated clients.
    ///
    /// The tool will spawn as many tokio tasks as this number specifies,
    /// each owning a separate operation created by `operation_factory`.
    ///
    /// Must not be zero.
    pub concurrency: u64,

    /// The maximum number of operations to be performed per second,
    /// summed over all workers. If `None`, there is no rate limit.
    pub rate_limit_per_second: Option<f64>,

    /// Creates the per-worker operations.
    pub operation_factory: Arc<dyn OperationFactory>,
}

/// Contains all necessary context needed to execute an Operation.
pub struct OperationContext {
    /// The current ID of the operation being performed.
    ///
    /// IDs are issued from a counter shared by all workers. Because of the
    /// parallelism the operations can be reordered, but if an operation with
    /// ID `X` > 0 was issued, then operations of IDs less than `X` were issued
    /// too.
    pub operation_id: u64,

    /// When the operation was supposed to start according to the rate limit.
    /// Equal to `actual_start_time` if there is no rate limit.
    pub scheduled_start_time: Instant,

    /// When the worker actually started the operation.
    pub actual_start_time: Instant,
}

/// The per-worker state machine repeatedly executed during the run.
///
/// A worker calls `prepare` once, then `execute` until asked to stop,
/// and finally `finish`.
#[async_trait]
pub trait Operation: Send {
    /// Runs before the first `execute`. An error here stops the whole run.
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Executes one iteration, given information in the OperationContext.
    ///
    /// Returns ControlFlow::Break if it should finish work, for example
    /// if the operation ID has exceeded the configured operation count.
    /// An `Err` stops the whole run, so recoverable failures should be
    /// handled by the operation itself.
    async fn execute(&mut self, ctx: &OperationContext) -> Result<ControlFlow<()>>;

    /// Runs after the last `execute`, also when the worker was asked to stop.
    async fn finish(&mut self) {}
}

/// Creates operations, one for each worker.
pub trait OperationFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Operation>>;
}
