mod aggregate;
mod bulk_insert;
mod find;
mod insert;

use std::sync::Arc;

use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter};

use crate::cache::SampleCache;
use crate::document::{DocumentGenerator, NameKey};
use crate::settings::Settings;
use crate::store::{CollectionHandles, DataStore, DocumentId, StoreError};

pub use aggregate::{geo_point_pipeline, Aggregate};
pub use bulk_insert::BulkInsert;
pub use find::{name_filter, PointFind};
pub use insert::SingleInsert;

/// Identifies one of the operations a worker can dispatch.
///
/// Variants are listed in the order of the task table built by [`default_tasks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    SingleInsert,
    PointFind,
    BulkInsert,
    Aggregate,
}

/// Result of a successfully dispatched operation.
#[derive(Debug)]
pub enum TaskOutcome {
    Inserted(DocumentId),
    /// An unordered bulk insert, possibly partially failed.
    BulkInserted { inserted: usize, failed: usize },
    Found { matched: bool },
    /// The fully drained result set of an aggregation.
    Aggregated { documents: Vec<Value> },
    /// The operation had nothing to do, e.g. a lookup before any insert.
    Skipped,
}

impl TaskOutcome {
    pub fn documents_written(&self) -> usize {
        match self {
            TaskOutcome::Inserted(_) => 1,
            TaskOutcome::BulkInserted { inserted, .. } => *inserted,
            _ => 0,
        }
    }

    pub fn documents_failed(&self) -> usize {
        match self {
            TaskOutcome::BulkInserted { failed, .. } => *failed,
            _ => 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("the worker has not provisioned its collection yet")]
    NotProvisioned,
    #[error("operation {0} is not registered")]
    NotRegistered(OperationKind),
}

/// Everything a task may use while executing, borrowed from the worker.
pub struct TaskContext<'a> {
    pub store: &'a dyn DataStore,
    pub collections: &'a CollectionHandles,
    pub cache: &'a mut SampleCache<NameKey>,
    pub generator: &'a mut DocumentGenerator,
}

/// A single kind of operation performed against the store.
#[async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> OperationKind;

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, OperationError>;
}

/// An entry of the task table: what to run and how often.
#[derive(Clone)]
pub struct TaskEntry {
    pub weight: u64,
    pub task: Arc<dyn Task>,
}

impl TaskEntry {
    pub fn new(weight: u64, task: impl Task + 'static) -> Self {
        Self {
            weight,
            task: Arc::new(task),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.task.kind()
    }
}

/// Builds the task table described by the settings.
pub fn default_tasks(settings: &Settings) -> Vec<TaskEntry> {
    let weights = &settings.weights;
    vec![
        TaskEntry::new(weights.insert, SingleInsert),
        TaskEntry::new(weights.find, PointFind),
        TaskEntry::new(
            weights.bulk_insert,
            BulkInsert::new(settings.docs_per_batch),
        ),
        TaskEntry::new(weights.aggregate, Aggregate::new()),
    ]
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::settings::OperationWeights;

    #[test]
    fn test_default_tasks_cover_all_kinds() {
        let settings = Settings {
            weights: OperationWeights {
                insert: 1,
                find: 2,
                bulk_insert: 3,
                aggregate: 4,
            },
            ..Settings::default()
        };
        let tasks = default_tasks(&settings);

        let kinds: Vec<OperationKind> = tasks.iter().map(TaskEntry::kind).collect();
        assert_eq!(kinds, OperationKind::iter().collect::<Vec<_>>());

        let weight_of = |kind| {
            tasks
                .iter()
                .find(|t| t.kind() == kind)
                .map(|t| t.weight)
                .unwrap()
        };
        assert_eq!(weight_of(OperationKind::SingleInsert), 1);
        assert_eq!(weight_of(OperationKind::PointFind), 2);
        assert_eq!(weight_of(OperationKind::BulkInsert), 3);
        assert_eq!(weight_of(OperationKind::Aggregate), 4);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(OperationKind::SingleInsert.to_string(), "single_insert");
        assert_eq!(OperationKind::PointFind.as_ref(), "point_find");
    }

    #[test]
    fn test_documents_written() {
        assert_eq!(
            TaskOutcome::Inserted(DocumentId("x".to_string())).documents_written(),
            1
        );
        let bulk = TaskOutcome::BulkInserted {
            inserted: 7,
            failed: 3,
        };
        assert_eq!(bulk.documents_written(), 7);
        assert_eq!(bulk.documents_failed(), 3);
        assert_eq!(TaskOutcome::Skipped.documents_written(), 0);
    }
}
