use super::{OperationError, OperationKind, Task, TaskContext, TaskOutcome};

/// Inserts one freshly generated document and remembers its key tuple,
/// so that later lookups can find it.
pub struct SingleInsert;

#[async_trait]
impl Task for SingleInsert {
    fn kind(&self) -> OperationKind {
        OperationKind::SingleInsert
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, OperationError> {
        let document = ctx.generator.generate();
        ctx.cache.record(document.name_key());

        let id = ctx
            .store
            .insert_one(&ctx.collections.primary, &document)
            .await?;
        Ok(TaskOutcome::Inserted(id))
    }
}
