use futures::TryStreamExt;
use serde_json::Value;

use crate::pipeline::{Expression, PipelineStage};

use super::{OperationError, OperationKind, Task, TaskContext, TaskOutcome};

/// Builds the pipeline which turns the raw `position` pair into a GeoJSON point.
///
/// `position` is stored as `[latitude, longitude]` strings, while GeoJSON
/// expects numeric `[longitude, latitude]` coordinates.
pub fn geo_point_pipeline() -> Vec<PipelineStage> {
    let coordinate = |idx| Expression::field("position").array_elem_at(idx).to_double();
    let location = Expression::Object(vec![
        ("type".to_string(), Expression::literal("Point")),
        (
            "coordinates".to_string(),
            Expression::Array(vec![coordinate(1), coordinate(0)]),
        ),
    ]);

    vec![
        PipelineStage::Set(vec![("location".to_string(), location)]),
        PipelineStage::Unset(vec!["position".to_string()]),
    ]
}

/// Runs [`geo_point_pipeline`] on the secondary handle and drains the result.
///
/// The whole result set is materialized, so the time spent iterating
/// it is accounted to this operation.
pub struct Aggregate {
    pipeline: Vec<PipelineStage>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self {
            pipeline: geo_point_pipeline(),
        }
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for Aggregate {
    fn kind(&self) -> OperationKind {
        OperationKind::Aggregate
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, OperationError> {
        let documents: Vec<Value> = ctx
            .store
            .aggregate(&ctx.collections.secondary, &self.pipeline)
            .await?
            .try_collect()
            .await?;
        Ok(TaskOutcome::Aggregated { documents })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::{apply_pipeline, pipeline_to_json};

    #[test]
    fn test_pipeline_command_form() {
        assert_eq!(
            pipeline_to_json(&geo_point_pipeline()),
            json!([
                {"$set": {"location": {
                    "type": "Point",
                    "coordinates": [
                        {"$toDouble": {"$arrayElemAt": ["$position", 1]}},
                        {"$toDouble": {"$arrayElemAt": ["$position", 0]}},
                    ],
                }}},
                {"$unset": ["position"]},
            ])
        );
    }

    #[test]
    fn test_pipeline_reorders_coordinates() {
        let doc = json!({"vehicleid": 5, "position": ["52.52437", "13.41053"]});
        let out = apply_pipeline(&geo_point_pipeline(), doc).unwrap();
        assert_eq!(
            out,
            json!({
                "vehicleid": 5,
                "location": {"type": "Point", "coordinates": [13.41053, 52.52437]},
            })
        );
    }
}
