use crate::document::Document;

use super::{OperationError, OperationKind, Task, TaskContext, TaskOutcome};

/// Inserts a batch of generated documents with a single unordered request.
///
/// The store attempts every document of the batch, so a failure of one
/// document (e.g. a duplicate key) doesn't prevent the others from being
/// committed. Failed documents are logged and counted in the outcome.
/// Keys of bulk-inserted documents are not cached.
pub struct BulkInsert {
    batch_size: usize,
}

impl BulkInsert {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[async_trait]
impl Task for BulkInsert {
    fn kind(&self) -> OperationKind {
        OperationKind::BulkInsert
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, OperationError> {
        let documents: Vec<Document> = (0..self.batch_size)
            .map(|_| ctx.generator.generate())
            .collect();

        let outcome = ctx
            .store
            .insert_many(&ctx.collections.primary, &documents, false)
            .await?;

        for failure in &outcome.failures {
            tracing::warn!(
                error = %failure.error,
                batch_index = failure.index,
                vehicleid = ?documents.get(failure.index).map(|d| d.vehicleid),
                "bulk insert document error",
            );
        }

        Ok(TaskOutcome::BulkInserted {
            inserted: outcome.inserted_count(),
            failed: outcome.failed_count(),
        })
    }
}
