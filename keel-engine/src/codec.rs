//! Output codecs: decode and validate an agent's final answer.

use std::marker::PhantomData;

use keel_tool::validate_arguments;
use keel_types::strip_code_fence;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Final output did not decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Turns the model's final text into a validated JSON value.
pub trait OutputCodec: Send + Sync {
    /// JSON Schema sent to the provider as the response format, if any.
    fn schema(&self) -> Option<&Value> {
        None
    }

    /// Decode and validate `raw`.
    fn decode(&self, raw: &str) -> Result<Value, DecodeError>;
}

fn parse_json(raw: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| DecodeError(format!("output is not valid JSON: {e}")))
}

/// Parses JSON and validates it against a JSON Schema.
#[derive(Debug, Clone)]
pub struct JsonSchemaCodec {
    schema: Value,
}

impl JsonSchemaCodec {
    /// Create a codec for `schema`.
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }
}

impl OutputCodec for JsonSchemaCodec {
    fn schema(&self) -> Option<&Value> {
        Some(&self.schema)
    }

    fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        let value = parse_json(raw)?;
        validate_arguments(&value, &self.schema)
            .map_err(|v| DecodeError(format!("output does not match schema: {v}")))?;
        Ok(value)
    }
}

/// Parses JSON into `T` and re-serializes it, so the output is exactly the
/// shape `T` accepts.
pub struct TypedCodec<T> {
    schema: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCodec<T> {
    /// Codec without a provider-side schema.
    pub fn new() -> Self {
        Self {
            schema: None,
            _marker: PhantomData,
        }
    }

    /// Also send `schema` to the provider.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl<T> Default for TypedCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OutputCodec for TypedCodec<T>
where
    T: DeserializeOwned + Serialize,
{
    fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        let typed: T = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| DecodeError(format!("output does not decode: {e}")))?;
        serde_json::to_value(typed).map_err(|e| DecodeError(e.to_string()))
    }
}
