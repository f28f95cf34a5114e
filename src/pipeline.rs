//! Typed queries understood by a [`DataStore`](crate::store::DataStore).
//!
//! Both filters and aggregation stages can be rendered to the JSON command
//! form used by document stores (`to_json`), and evaluated against a JSON
//! document, which is what the in-memory store does.

use anyhow::Result;
use serde_json::{json, Map, Value};

/// A conjunction of equality conditions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| lookup_field(document, field) == Some(expected))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.conditions.iter().cloned().collect())
    }
}

/// An aggregation expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// Value of a (possibly dotted) field path of the input document.
    Field(String),
    Literal(Value),
    /// Element at the given index of an array; negative indices count from the end.
    ArrayElemAt(Box<Expression>, i64),
    /// Converts a number or a numeric string to a double.
    ToDouble(Box<Expression>),
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Expression::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn array_elem_at(self, idx: i64) -> Self {
        Expression::ArrayElemAt(Box::new(self), idx)
    }

    pub fn to_double(self) -> Self {
        Expression::ToDouble(Box::new(self))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expression::Field(path) => Value::String(format!("${path}")),
            Expression::Literal(value) => value.clone(),
            Expression::ArrayElemAt(array, idx) => {
                json!({ "$arrayElemAt": [array.to_json(), idx] })
            }
            Expression::ToDouble(inner) => json!({ "$toDouble": inner.to_json() }),
            Expression::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect(),
            ),
            Expression::Array(items) => {
                Value::Array(items.iter().map(Expression::to_json).collect())
            }
        }
    }

    pub fn evaluate(&self, document: &Value) -> Result<Value> {
        match self {
            Expression::Field(path) => {
                Ok(lookup_field(document, path).cloned().unwrap_or(Value::Null))
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::ArrayElemAt(array, idx) => match array.evaluate(document)? {
                Value::Array(items) => {
                    let len = items.len() as i64;
                    let idx = if *idx < 0 { len + idx } else { *idx };
                    Ok(usize::try_from(idx)
                        .ok()
                        .and_then(|idx| items.into_iter().nth(idx))
                        .unwrap_or(Value::Null))
                }
                Value::Null => Ok(Value::Null),
                other => anyhow::bail!("$arrayElemAt's first argument must be an array, got {}", other),
            },
            Expression::ToDouble(inner) => {
                let value = inner.evaluate(document)?;
                let double = match &value {
                    Value::Null => return Ok(Value::Null),
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                };
                let double =
                    double.ok_or_else(|| anyhow::anyhow!("Failed to convert {} to double", value))?;
                Ok(json!(double))
            }
            Expression::Object(fields) => {
                let mut object = Map::with_capacity(fields.len());
                for (name, expr) in fields {
                    object.insert(name.clone(), expr.evaluate(document)?);
                }
                Ok(Value::Object(object))
            }
            Expression::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| item.evaluate(document))
                    .collect::<Result<_>>()?,
            )),
        }
    }
}

/// A single stage of an aggregation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineStage {
    /// Adds (or overwrites) top-level fields computed from the input document.
    Set(Vec<(String, Expression)>),
    /// Removes top-level fields.
    Unset(Vec<String>),
}

impl PipelineStage {
    pub fn to_json(&self) -> Value {
        match self {
            PipelineStage::Set(fields) => {
                let fields: Map<String, Value> = fields
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect();
                json!({ "$set": fields })
            }
            PipelineStage::Unset(fields) => json!({ "$unset": fields }),
        }
    }

    pub fn apply(&self, mut document: Value) -> Result<Value> {
        match self {
            PipelineStage::Set(fields) => {
                let values = fields
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), expr.evaluate(&document)?)))
                    .collect::<Result<Vec<_>>>()?;
                let object = document
                    .as_object_mut()
                    .ok_or_else(|| anyhow::anyhow!("$set applied to a non-object document"))?;
                object.extend(values);
            }
            PipelineStage::Unset(fields) => {
                if let Some(object) = document.as_object_mut() {
                    for field in fields {
                        object.remove(field);
                    }
                }
            }
        }
        Ok(document)
    }
}

pub fn pipeline_to_json(stages: &[PipelineStage]) -> Value {
    Value::Array(stages.iter().map(PipelineStage::to_json).collect())
}

/// Runs `document` through every stage, in order.
pub fn apply_pipeline(stages: &[PipelineStage], document: Value) -> Result<Value> {
    stages
        .iter()
        .try_fold(document, |document, stage| stage.apply(document))
}

fn lookup_field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.as_object()?.get(segment))
}
