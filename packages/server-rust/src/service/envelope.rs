//! Response envelope: success normalization, failure wrapping, and hydration
//! of stored payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::classify::classify;
use super::operation::{OperationContext, OperationError, OperationResult};

/// Marker key of an encoded payload: `{"$encoded": "<json text>"}`.
pub const ENCODED_KEY: &str = "$encoded";
/// Marker key of a stream reference: `{"$stream": "<stream id>"}`.
pub const STREAM_KEY: &str = "$stream";

/// JSON round-trip `data` into plain structural data.
///
/// Members that do not serialize (skipped fields, live handles) are dropped;
/// non-finite floats become `null`.
///
/// # Errors
///
/// Returns `OperationError::Serialization` if `data` cannot be represented
/// as JSON at all (for example a map with non-string keys).
pub fn normalize<T, U>(data: &T) -> Result<U, OperationError>
where
    T: Serialize + ?Sized,
    U: DeserializeOwned,
{
    let value = serde_json::to_value(data).map_err(OperationError::Serialization)?;
    serde_json::from_value(value).map_err(OperationError::Serialization)
}

/// Success variant carrying the normalized `data`.
///
/// A value that cannot be normalized is reported as a failure of `ctx`
/// instead of escaping the operation boundary.
pub fn wrap_success<T>(ctx: &OperationContext, data: &T) -> OperationResult<T>
where
    T: Serialize + DeserializeOwned,
{
    match normalize(data) {
        Ok(normalized) => OperationResult::Success(normalized),
        Err(err) => wrap_failure(ctx, &err),
    }
}

/// Failure variant for `failure` raised while running `ctx`.
#[must_use]
pub fn wrap_failure<T>(ctx: &OperationContext, failure: &OperationError) -> OperationResult<T> {
    OperationResult::Failure(classify(failure, ctx.operation, &ctx.params))
}

/// Round-trip a rich resource and expand the references stored inside it.
///
/// Encoded payloads are decoded (recursively) and stream references are
/// expanded into `{"type": "stream", "streamId": ...}` descriptors that can be
/// opened with `read_stream`.
///
/// # Errors
///
/// Returns `OperationError::Hydration` when an encoded payload is not valid
/// JSON, and `OperationError::Serialization` if `data` itself does not
/// serialize.
pub fn hydrate<T: Serialize + ?Sized>(
    resource: &'static str,
    data: &T,
) -> Result<Value, OperationError> {
    let value: Value = normalize(data)?;
    expand(resource, value)
}

fn expand(resource: &'static str, value: Value) -> Result<Value, OperationError> {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(text)) = map.get(ENCODED_KEY) {
                    let decoded: Value = serde_json::from_str(text)
                        .map_err(|source| OperationError::Hydration { resource, source })?;
                    return expand(resource, decoded);
                }
                if let Some(Value::String(stream_id)) = map.get(STREAM_KEY) {
                    return Ok(stream_descriptor(stream_id));
                }
            }
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(key, expand(resource, inner)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| expand(resource, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        scalar => Ok(scalar),
    }
}

fn stream_descriptor(stream_id: &str) -> Value {
    serde_json::json!({ "type": "stream", "streamId": stream_id })
}
