use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::stream::PartialJsonBuffer;

/// Turns buffer updates into a stream of typed partial values.
///
/// For every update the pipeline runs, in order: partial validation
/// (tolerant of required fields that are still missing mid-stream),
/// deserialization, an optional transform, and a dedup check against
/// the structural fingerprint of the last emitted value. Any stage
/// failure short-circuits to a tagged [`PipelineOutcome::Skipped`] and
/// the stream continues; only [`PartialObjectPipeline::finalize`]
/// failures are terminal.
pub struct PartialObjectPipeline<T> {
    schema: Option<Value>,
    required: Vec<String>,
    transform: Option<Box<dyn Fn(T) -> T + Send + Sync>>,
    last_fingerprint: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

/// The outcome of processing one buffer update.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome<T> {
    /// A new value was produced.
    Emitted(T),
    /// The update produced nothing; the tag says which stage bailed.
    Skipped(SkipReason),
}

/// Which pipeline stage skipped the update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The buffer has no candidate value yet.
    Empty,
    /// The candidate doesn't match the declared shape.
    Invalid,
    /// The candidate couldn't be deserialized into the target type.
    Malformed,
    /// The value is structurally identical to the last emitted one.
    Unchanged,
}

/// A terminal failure of the post-stream validation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The stream ended without a decodable value.
    #[error("the stream ended without a decodable value")]
    MissingValue,
    /// Required fields were still missing when the stream ended.
    #[error("missing required fields: {0}")]
    MissingRequired(String),
    /// The final value couldn't be deserialized.
    #[error("failed to decode the final value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl<T> PartialObjectPipeline<T>
where
    T: DeserializeOwned + Serialize,
{
    /// Creates a pipeline with no schema and no transform.
    pub fn new() -> Self {
        Self {
            schema: None,
            required: Vec::new(),
            transform: None,
            last_fingerprint: None,
            _marker: PhantomData,
        }
    }

    /// Attaches a JSON schema. The pipeline reads the top-level
    /// `"type"` for partial validation and the `"required"` list for
    /// the final strict validation.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        self.schema = Some(schema);
        self
    }

    /// Attaches a pure transform applied to every deserialized value.
    pub fn with_transform(
        mut self,
        transform: impl Fn(T) -> T + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Processes one buffer update.
    pub fn process(
        &mut self,
        buffer: &PartialJsonBuffer,
    ) -> PipelineOutcome<T> {
        let Some(candidate) = buffer.value() else {
            return PipelineOutcome::Skipped(SkipReason::Empty);
        };
        if !self.partially_valid(&candidate) {
            return PipelineOutcome::Skipped(SkipReason::Invalid);
        }
        let Ok(value) = serde_json::from_value::<T>(candidate) else {
            return PipelineOutcome::Skipped(SkipReason::Malformed);
        };
        let value = match &self.transform {
            Some(transform) => transform(value),
            None => value,
        };
        let Ok(fingerprint) = serde_json::to_value(&value) else {
            return PipelineOutcome::Skipped(SkipReason::Malformed);
        };
        if self.last_fingerprint.as_ref() == Some(&fingerprint) {
            return PipelineOutcome::Skipped(SkipReason::Unchanged);
        }
        self.last_fingerprint = Some(fingerprint);
        PipelineOutcome::Emitted(value)
    }

    /// Runs the strict post-stream validation and produces the final
    /// value. Unlike [`process`](Self::process), failures here are
    /// terminal.
    pub fn finalize(
        &mut self,
        buffer: &PartialJsonBuffer,
    ) -> Result<T, PipelineError> {
        let candidate = buffer.value().ok_or(PipelineError::MissingValue)?;
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| candidate.get(name.as_str()).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingRequired(missing.join(", ")));
        }
        let value = serde_json::from_value::<T>(candidate)?;
        Ok(match &self.transform {
            Some(transform) => transform(value),
            None => value,
        })
    }

    /// The mid-stream shape check: only the top-level type is
    /// enforced, required fields may still be missing.
    fn partially_valid(&self, candidate: &Value) -> bool {
        let Some(schema) = &self.schema else {
            return true;
        };
        match schema.get("type").and_then(Value::as_str) {
            Some("object") => candidate.is_object(),
            Some("array") => candidate.is_array(),
            Some("string") => candidate.is_string(),
            Some("number") => candidate.is_number(),
            Some("integer") => candidate.is_i64() || candidate.is_u64(),
            Some("boolean") => candidate.is_boolean(),
            _ => true,
        }
    }
}

impl<T> Default for PartialObjectPipeline<T>
where
    T: DeserializeOwned + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Profile {
        name: Option<String>,
        age: Option<u64>,
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" }
            },
            "required": ["name", "age"]
        })
    }

    #[test]
    fn test_emits_growing_partial_values() {
        let mut buffer = PartialJsonBuffer::new();
        let mut pipeline =
            PartialObjectPipeline::<Profile>::new().with_schema(schema());

        assert_eq!(
            pipeline.process(&buffer),
            PipelineOutcome::Skipped(SkipReason::Empty)
        );

        buffer.push(r#"{"name": "Ada"#);
        let PipelineOutcome::Emitted(profile) = pipeline.process(&buffer)
        else {
            panic!("expected an emitted value");
        };
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert_eq!(profile.age, None);

        buffer.push(r#"", "age": 36}"#);
        let PipelineOutcome::Emitted(profile) = pipeline.process(&buffer)
        else {
            panic!("expected an emitted value");
        };
        assert_eq!(profile.age, Some(36));
    }

    #[test]
    fn test_dedup_ignores_whitespace_and_key_order() {
        let mut buffer = PartialJsonBuffer::new();
        let mut pipeline = PartialObjectPipeline::<Profile>::new();

        buffer.push(r#"{"name":"Ada","age":36}"#);
        assert!(matches!(
            pipeline.process(&buffer),
            PipelineOutcome::Emitted(_)
        ));

        buffer.reset();
        buffer.push(r#"{ "age": 36,  "name": "Ada" }"#);
        assert_eq!(
            pipeline.process(&buffer),
            PipelineOutcome::Skipped(SkipReason::Unchanged)
        );
    }

    #[test]
    fn test_wrong_shape_is_skipped_not_fatal() {
        let mut buffer = PartialJsonBuffer::new();
        let mut pipeline =
            PartialObjectPipeline::<Profile>::new().with_schema(schema());

        buffer.push(r#"[1, 2]"#);
        assert_eq!(
            pipeline.process(&buffer),
            PipelineOutcome::Skipped(SkipReason::Invalid)
        );
    }

    #[test]
    fn test_transform_applies_before_dedup() {
        let mut buffer = PartialJsonBuffer::new();
        let mut pipeline = PartialObjectPipeline::<Profile>::new()
            .with_transform(|mut profile: Profile| {
                profile.name = profile.name.map(|n| n.to_uppercase());
                profile
            });

        buffer.push(r#"{"name": "ada"}"#);
        let PipelineOutcome::Emitted(profile) = pipeline.process(&buffer)
        else {
            panic!("expected an emitted value");
        };
        assert_eq!(profile.name.as_deref(), Some("ADA"));

        // A raw change that transforms to the same value is a dup.
        buffer.reset();
        buffer.push(r#"{"name": "ADA"}"#);
        assert_eq!(
            pipeline.process(&buffer),
            PipelineOutcome::Skipped(SkipReason::Unchanged)
        );
    }

    #[test]
    fn test_finalize_enforces_required_fields() {
        let mut buffer = PartialJsonBuffer::new();
        let mut pipeline =
            PartialObjectPipeline::<Profile>::new().with_schema(schema());

        buffer.push(r#"{"name": "Ada"}"#);
        let err = pipeline.finalize(&buffer).unwrap_err();
        assert!(matches!(err, PipelineError::MissingRequired(names) if names == "age"));

        buffer.reset();
        buffer.push(r#"{"name": "Ada", "age": 36}"#);
        let profile = pipeline.finalize(&buffer).unwrap();
        assert_eq!(profile.age, Some(36));
    }

    #[test]
    fn test_finalize_without_value_is_terminal() {
        let buffer = PartialJsonBuffer::new();
        let mut pipeline = PartialObjectPipeline::<Profile>::new();
        assert!(matches!(
            pipeline.finalize(&buffer),
            Err(PipelineError::MissingValue)
        ));
    }
}
