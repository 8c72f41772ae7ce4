//! Boundary parsing for the events a stage function can receive.

use serde_json::{json, Value};
use url::form_urlencoded;

use crate::contract::{HandoffPayload, SourceLocation};
use crate::error::ValidationError;

const S3_EVENT_SOURCE: &str = "aws:s3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// New source artifacts, from an S3 notification or a direct `{bucket, key}` call.
    ObjectCreated(Vec<SourceLocation>),
    /// A previous stage handing a document over.
    Handoff(HandoffPayload),
}

pub fn parse_trigger_event(event: Value) -> Result<TriggerEvent, ValidationError> {
    let event = unwrap_body(event)?;
    let Some(object) = event.as_object() else {
        return Err(ValidationError::new("Event payload must be a JSON object"));
    };

    if let Some(records) = object.get("Records") {
        return parse_s3_records(records).map(TriggerEvent::ObjectCreated);
    }

    if object.contains_key("document_id") || object.contains_key("session_id") {
        let payload: HandoffPayload = serde_json::from_value(event.clone())
            .map_err(|error| ValidationError::new(format!("Malformed handoff: {error}")))?;
        if payload.document_id.trim().is_empty() {
            return Err(ValidationError::new("document_id cannot be empty"));
        }
        return Ok(TriggerEvent::Handoff(payload));
    }

    match (
        object.get("bucket").and_then(Value::as_str),
        object.get("key").and_then(Value::as_str),
    ) {
        (Some(bucket), Some(key)) if !bucket.trim().is_empty() && !key.trim().is_empty() => {
            Ok(TriggerEvent::ObjectCreated(vec![SourceLocation::new(
                bucket.trim(),
                key,
            )]))
        }
        _ => Err(ValidationError::new(
            "Invalid event format - expected S3 trigger, direct invocation or stage handoff",
        )),
    }
}

fn unwrap_body(event: Value) -> Result<Value, ValidationError> {
    let Some(body) = event.as_object().and_then(|object| object.get("body")) else {
        return Ok(event);
    };

    match body {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(body.clone()),
        Value::String(text) => serde_json::from_str(text)
            .map_err(|error| ValidationError::new(format!("Malformed JSON body: {error}"))),
        _ => Err(ValidationError::new("Request body must be a JSON object")),
    }
}

fn parse_s3_records(records: &Value) -> Result<Vec<SourceLocation>, ValidationError> {
    let records = records
        .as_array()
        .filter(|records| !records.is_empty())
        .ok_or_else(|| ValidationError::new("Records must be a non-empty array"))?;

    records.iter().map(parse_s3_record).collect()
}

fn parse_s3_record(record: &Value) -> Result<SourceLocation, ValidationError> {
    let source = record
        .get("eventSource")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if source != S3_EVENT_SOURCE {
        return Err(ValidationError::new(format!(
            "Unsupported event source '{source}'"
        )));
    }

    let bucket = record
        .pointer("/s3/bucket/name")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::new("S3 record must include s3.bucket.name"))?;
    let key = record
        .pointer("/s3/object/key")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::new("S3 record must include s3.object.key"))?;

    let location = SourceLocation::new(bucket, decode_object_key(key));
    Ok(
        match record.pointer("/s3/object/eTag").and_then(Value::as_str) {
            Some(etag) => location.with_etag(etag),
            None => location,
        },
    )
}

/// S3 notifications carry form-encoded keys (`+` for spaces, `%XX` escapes).
pub fn decode_object_key(key: &str) -> String {
    form_urlencoded::parse(key.as_bytes())
        .map(|(name, value)| {
            if value.is_empty() {
                name.into_owned()
            } else {
                format!("{name}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
