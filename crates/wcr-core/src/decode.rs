use apache_avro::types::Value as AvroValue;
use base64::Engine;

use crate::{errors::Error, schema::CompiledSchema, Result};

/// One raw event as received in a subscription batch.
#[derive(Clone, Debug)]
pub struct RawEvent {
    /// Opaque stream position marker, 8 bytes big-endian.
    pub replay_cursor: Vec<u8>,
    pub payload: Vec<u8>,
}

/// A decoded event: stringified cursor + the payload as a JSON tree.
#[derive(Clone, Debug)]
pub struct DecodedEvent {
    pub replay_cursor: String,
    pub fields: serde_json::Value,
}

/// Render a replay cursor for logs and decoded events.
///
/// Cursors are opaque identifiers; we stringify the big-endian u64 and
/// never do arithmetic on it.
pub fn cursor_to_string(cursor: &[u8]) -> Result<String> {
    let bytes: [u8; 8] = cursor
        .try_into()
        .map_err(|_| Error::Decode(format!("replay cursor must be 8 bytes, got {}", cursor.len())))?;
    Ok(u64::from_be_bytes(bytes).to_string())
}

/// Decode one raw event against a compiled topic schema.
pub fn decode_event(schema: &CompiledSchema, raw: &RawEvent) -> Result<DecodedEvent> {
    let replay_cursor = cursor_to_string(&raw.replay_cursor)?;

    let mut reader = raw.payload.as_slice();
    let avro_value = apache_avro::from_avro_datum(&schema.schema, &mut reader, None)
        .map_err(|e| Error::Decode(format!("avro decode: {e}")))?;

    Ok(DecodedEvent {
        replay_cursor,
        fields: avro_to_json(&avro_value),
    })
}

/// Avro value → JSON tree, preserving field names as known at
/// schema-compile time. Unions flatten to their inner value; `long` stays
/// an exact integer (never routed through a double).
fn avro_to_json(value: &AvroValue) -> serde_json::Value {
    match value {
        AvroValue::Null => serde_json::Value::Null,
        AvroValue::Boolean(b) => serde_json::Value::Bool(*b),
        AvroValue::Int(i) => serde_json::json!(i),
        AvroValue::Long(l) => serde_json::json!(l),
        AvroValue::Float(f) => serde_json::json!(f),
        AvroValue::Double(d) => serde_json::json!(d),
        AvroValue::Bytes(b) | AvroValue::Fixed(_, b) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        AvroValue::String(s) | AvroValue::Enum(_, s) => serde_json::Value::String(s.clone()),
        AvroValue::Union(_, inner) => avro_to_json(inner),
        AvroValue::Array(items) => {
            serde_json::Value::Array(items.iter().map(avro_to_json).collect())
        }
        AvroValue::Map(entries) => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        AvroValue::Record(fields) => {
            let map: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        AvroValue::Date(d) => serde_json::json!(d),
        AvroValue::TimeMillis(t) => serde_json::json!(t),
        AvroValue::TimeMicros(t) => serde_json::json!(t),
        AvroValue::TimestampMillis(t) => serde_json::json!(t),
        AvroValue::TimestampMicros(t) => serde_json::json!(t),
        AvroValue::TimestampNanos(t) => serde_json::json!(t),
        AvroValue::LocalTimestampMillis(t) => serde_json::json!(t),
        AvroValue::LocalTimestampMicros(t) => serde_json::json!(t),
        AvroValue::LocalTimestampNanos(t) => serde_json::json!(t),
        AvroValue::Decimal(d) => {
            let bytes: Vec<u8> = d.try_into().unwrap_or_default();
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        AvroValue::BigDecimal(d) => serde_json::Value::String(d.to_string()),
        AvroValue::Uuid(u) => serde_json::Value::String(u.to_string()),
        AvroValue::Duration(_) => serde_json::Value::Null,
    }
}
