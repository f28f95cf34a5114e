use crate::document::NameKey;
use crate::pipeline::Filter;

use super::{OperationError, OperationKind, Task, TaskContext, TaskOutcome};

/// Looks up a previously inserted document by its key tuple.
///
/// Key tuples are not unique, any matching document is a valid result.
/// Before the worker inserted anything there is nothing to look for,
/// and the operation is skipped without contacting the store.
pub struct PointFind;

pub fn name_filter(key: &NameKey) -> Filter {
    Filter::new()
        .eq("first_name", key.first_name.as_str())
        .eq("last_name", key.last_name.as_str())
}

#[async_trait]
impl Task for PointFind {
    fn kind(&self) -> OperationKind {
        OperationKind::PointFind
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, OperationError> {
        let Some(key) = ctx.cache.sample() else {
            return Ok(TaskOutcome::Skipped);
        };

        let found = ctx
            .store
            .find_one(&ctx.collections.primary, &name_filter(&key))
            .await?;
        Ok(TaskOutcome::Found {
            matched: found.is_some(),
        })
    }
}
