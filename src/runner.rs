use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use strum_macros::Display;

use crate::cache::{SampleCache, DEFAULT_CACHE_CAPACITY};
use crate::configuration::{Operation, OperationContext, OperationFactory};
use crate::document::{DocumentGenerator, NameKey};
use crate::operation::{
    default_tasks, OperationError, OperationKind, Task, TaskContext, TaskEntry, TaskOutcome,
};
use crate::scheduler::TaskScheduler;
use crate::settings::Settings;
use crate::stats::ShardedStats;
use crate::store::{CollectionHandles, DataStore, IndexModel};
use crate::RngGen;

/// Lifecycle of a single worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum RunnerState {
    Uninitialized,
    /// The collection and its indexes exist, nothing was dispatched yet.
    Provisioned,
    Running,
    Stopped,
}

/// Indexes created on the target collection by every worker.
pub fn collection_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::new("idx_vehicleid").ascending("vehicleid"),
        IndexModel::new("idx_ts").ascending("ts"),
        IndexModel::new("idx_location_2dsphere").geo_2dsphere("location"),
        IndexModel::new("idx_ts_vehicle")
            .ascending("ts")
            .ascending("vehicleid"),
        IndexModel::new("idx_vehicle_status")
            .ascending("vehicleid")
            .ascending("enginestate"),
        IndexModel::new("idx_names")
            .ascending("first_name")
            .ascending("last_name"),
    ]
}

/// The per-worker loop: provisions the collection, then repeatedly draws
/// an operation from the scheduler and dispatches it.
///
/// Owns everything that must not be shared between workers: the sample
/// cache, the document generator and the random sources.
pub struct WorkloadRunner {
    settings: Arc<Settings>,
    store: Arc<dyn DataStore>,
    stats: Arc<ShardedStats>,

    tasks: HashMap<OperationKind, Arc<dyn Task>>,
    scheduler: TaskScheduler<OperationKind>,
    cache: SampleCache<NameKey>,
    generator: DocumentGenerator,

    collections: Option<CollectionHandles>,
    state: RunnerState,
}

impl WorkloadRunner {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn DataStore>,
        stats: Arc<ShardedStats>,
    ) -> Result<Self> {
        let tasks = default_tasks(&settings);
        Self::with_tasks(settings, store, stats, tasks, rand::thread_rng().gen())
    }

    /// Creates a runner with an explicit task table. All random sources
    /// of the runner are derived from `seed`.
    pub fn with_tasks(
        settings: Arc<Settings>,
        store: Arc<dyn DataStore>,
        stats: Arc<ShardedStats>,
        tasks: Vec<TaskEntry>,
        seed: u128,
    ) -> Result<Self> {
        let mut seeder = RngGen::new(seed);

        let scheduler = TaskScheduler::with_rng(
            tasks.iter().map(|entry| (entry.kind(), entry.weight)),
            RngGen::new(seeder.gen()),
        )?;

        let mut table = HashMap::with_capacity(tasks.len());
        for entry in tasks {
            let kind = entry.kind();
            anyhow::ensure!(
                table.insert(kind, entry.task).is_none(),
                "Operation {} is registered more than once",
                kind,
            );
        }

        Ok(Self {
            settings,
            store,
            stats,
            tasks: table,
            scheduler,
            cache: SampleCache::with_rng(DEFAULT_CACHE_CAPACITY, RngGen::new(seeder.gen())),
            generator: DocumentGenerator::with_rng(RngGen::new(seeder.gen())),
            collections: None,
            state: RunnerState::Uninitialized,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn cache(&self) -> &SampleCache<NameKey> {
        &self.cache
    }

    /// Creates the collection and its indexes if they don't exist yet.
    ///
    /// Resets the sample cache. The worker cannot proceed if this fails.
    pub async fn provision(&mut self) -> Result<()> {
        let database = &self.settings.db_name;
        let name = &self.settings.collection_name;
        let collections = self
            .store
            .ensure_collection(database, name, &collection_indexes())
            .await
            .with_context(|| format!("Failed to provision collection {}.{}", database, name))?;

        tracing::debug!(database = %database, collection = %name, "collection provisioned");
        self.cache.clear();
        self.collections = Some(collections);
        self.state = RunnerState::Provisioned;
        Ok(())
    }

    pub fn next_operation(&mut self) -> OperationKind {
        self.scheduler.next()
    }

    /// Executes the task registered for `kind`.
    pub async fn dispatch(&mut self, kind: OperationKind) -> Result<TaskOutcome, OperationError> {
        let collections = self
            .collections
            .as_ref()
            .ok_or(OperationError::NotProvisioned)?;
        let task = self
            .tasks
            .get(&kind)
            .ok_or(OperationError::NotRegistered(kind))?;

        self.state = RunnerState::Running;
        let mut ctx = TaskContext {
            store: self.store.as_ref(),
            collections,
            cache: &mut self.cache,
            generator: &mut self.generator,
        };
        task.execute(&mut ctx).await
    }

    /// Draws the next operation and dispatches it.
    pub async fn step(&mut self) -> (OperationKind, Result<TaskOutcome, OperationError>) {
        let kind = self.next_operation();
        let result = self.dispatch(kind).await;
        (kind, result)
    }

    /// Releases the collection handles and the cached keys.
    pub fn stop(&mut self) {
        self.collections = None;
        self.cache.clear();
        self.state = RunnerState::Stopped;
    }
}

#[async_trait]
impl Operation for WorkloadRunner {
    async fn prepare(&mut self) -> Result<()> {
        self.provision().await
    }

    async fn execute(&mut self, ctx: &OperationContext) -> Result<ControlFlow<()>> {
        if let Some(limit) = self.settings.operation_count {
            if ctx.operation_id >= limit {
                return Ok(ControlFlow::Break(()));
            }
        }

        let (kind, result) = self.step().await;
        let latency = ctx.scheduled_start_time.elapsed();

        match &result {
            Err(err) => {
                tracing::error!(
                    error = %err,
                    operation = %kind,
                    operation_id = ctx.operation_id,
                    "operation error",
                );
            }
            Ok(TaskOutcome::Skipped) => {
                tracing::trace!(operation = %kind, "nothing to do, skipped");
            }
            Ok(_) => {}
        }

        self.stats
            .get_shard_mut()
            .account_operation(kind, latency, &result);

        Ok(ControlFlow::Continue(()))
    }

    async fn finish(&mut self) {
        self.stop();
    }
}

/// Creates a [`WorkloadRunner`] for each worker. All of them share
/// the settings, the store and the stats.
pub struct WorkloadRunnerFactory {
    settings: Arc<Settings>,
    store: Arc<dyn DataStore>,
    stats: Arc<ShardedStats>,
    tasks: Vec<TaskEntry>,
}

impl WorkloadRunnerFactory {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn DataStore>,
        stats: Arc<ShardedStats>,
    ) -> Result<Self> {
        let tasks = default_tasks(&settings);
        Self::with_tasks(settings, store, stats, tasks)
    }

    /// Fails if no task of the table could ever be scheduled.
    pub fn with_tasks(
        settings: Arc<Settings>,
        store: Arc<dyn DataStore>,
        stats: Arc<ShardedStats>,
        tasks: Vec<TaskEntry>,
    ) -> Result<Self> {
        let scheduler = TaskScheduler::new(tasks.iter().map(|entry| (entry.kind(), entry.weight)))?;
        tracing::info!(weights = %scheduler, "operation weights");

        Ok(Self {
            settings,
            store,
            stats,
            tasks,
        })
    }
}

impl OperationFactory for WorkloadRunnerFactory {
    fn create(&self) -> Result<Box<dyn Operation>> {
        let runner = WorkloadRunner::with_tasks(
            Arc::clone(&self.settings),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.tasks.clone(),
            rand::thread_rng().gen(),
        )?;
        Ok(Box::new(runner))
    }
}
