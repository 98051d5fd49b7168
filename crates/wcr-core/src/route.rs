use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{decode::DecodedEvent, extract::find_field, settings::RoutingSettings};

/// Type-field value that marks the newer typed envelope.
const INTERACTION_TYPE: &str = "Interaction";

/// Payload format value that carries attachments.
const ATTACHMENTS_FORMAT: &str = "Attachments";

/// A reply matched to the configured routing target, ready for delivery
/// to the web client. Immutable once created; owned by the delivery queue
/// until drained. Serialized field names are the push-channel wire names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyRecord {
    #[serde(rename = "channelAddressIdFieldVal")]
    pub channel_address_id: String,
    #[serde(rename = "replyMessageText")]
    pub message_text: String,
    #[serde(rename = "attachmentName", skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(rename = "attachmentUrl", skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(rename = "recipientUserName")]
    pub recipient_id: String,
}

/// The two supported event shapes, plus the discard bucket.
///
/// Events published under the current schema carry a type discriminator;
/// events from the prior schema have no type field at all (a deprecated
/// compatibility path kept for the migration window).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventShape {
    Typed,
    Legacy,
    Unsupported,
}

/// Pure shape classification, resolved once per event.
///
/// A flattened optional union decodes an unset type field to JSON null;
/// that counts as absent, not as an unsupported type value.
pub fn classify(fields: &Value, settings: &RoutingSettings) -> EventShape {
    match find_field(fields, &settings.type_field) {
        Some(Value::String(s)) if s == INTERACTION_TYPE => EventShape::Typed,
        None | Some(Value::Null) => EventShape::Legacy,
        Some(_) => EventShape::Unsupported,
    }
}

/// Shape-independent routing inputs once extraction succeeded.
struct Extracted {
    channel: String,
    payload: Value,
    recipient: Value,
}

/// Transform one decoded event into zero or one [`ReplyRecord`] against
/// the given settings snapshot.
///
/// Every branch that depends on a field's presence checks for absence and
/// discards the event; a mismatch against the routing target is a silent
/// discard, never an error.
pub fn route_event(event: &DecodedEvent, settings: &RoutingSettings) -> Option<ReplyRecord> {
    let extracted = match classify(&event.fields, settings) {
        EventShape::Typed => extract_typed(event, settings)?,
        EventShape::Legacy => extract_legacy(event, settings)?,
        EventShape::Unsupported => {
            debug!(
                replay_cursor = %event.replay_cursor,
                "unsupported event type, discarding"
            );
            return None;
        }
    };

    // Filter #1: the event must target the configured channel address.
    if extracted.channel != settings.channel_address_id {
        return None;
    }

    // Filter #2: the recipient subject must match the configured recipient.
    let subject = find_field(&extracted.recipient, "subject")?.as_str()?;
    if subject != settings.recipient_id {
        return None;
    }

    let message_text = find_field(&extracted.payload, "text")?.as_str()?.to_string();
    let (attachment_name, attachment_url) = first_attachment(&extracted.payload);

    Some(ReplyRecord {
        channel_address_id: extracted.channel,
        message_text,
        attachment_name,
        attachment_url,
        recipient_id: subject.to_string(),
    })
}

/// Typed envelope: the payload field holds a JSON-encoded envelope string
/// carrying `payload`, `channelAddressIdentifier`, and `recipient`.
fn extract_typed(event: &DecodedEvent, settings: &RoutingSettings) -> Option<Extracted> {
    let envelope_str = find_field(&event.fields, &settings.payload_field)?.as_str()?;
    let envelope = parse_embedded_json(event, &settings.payload_field, envelope_str)?;

    let channel = find_field(&envelope, "channelAddressIdentifier")?
        .as_str()?
        .to_string();
    let payload = find_field(&envelope, "payload")?.clone();
    let recipient = find_field(&envelope, "recipient")?.clone();

    Some(Extracted {
        channel,
        payload,
        recipient,
    })
}

/// Legacy flat shape: three independently named fields; payload and
/// recipient are JSON strings parsed directly.
fn extract_legacy(event: &DecodedEvent, settings: &RoutingSettings) -> Option<Extracted> {
    let channel = find_field(&event.fields, &settings.channel_field)?
        .as_str()?
        .to_string();

    let payload_str = find_field(&event.fields, &settings.payload_field)?.as_str()?;
    let payload = parse_embedded_json(event, &settings.payload_field, payload_str)?;

    let recipient_str = find_field(&event.fields, &settings.recipient_field)?.as_str()?;
    let recipient = parse_embedded_json(event, &settings.recipient_field, recipient_str)?;

    Some(Extracted {
        channel,
        payload,
        recipient,
    })
}

/// Malformed embedded JSON is a decode-class fault local to this event:
/// logged and discarded, never propagated into the stream loop.
fn parse_embedded_json(event: &DecodedEvent, field: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(
                replay_cursor = %event.replay_cursor,
                field,
                error = %e,
                "malformed JSON in extracted field, skipping event"
            );
            None
        }
    }
}

fn first_attachment(payload: &Value) -> (Option<String>, Option<String>) {
    let format = find_field(payload, "formatType").and_then(Value::as_str);
    if format != Some(ATTACHMENTS_FORMAT) {
        return (None, None);
    }

    let Some(first) = payload
        .get("attachments")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
    else {
        return (None, None);
    };

    (
        first.get("name").and_then(Value::as_str).map(str::to_string),
        first.get("url").and_then(Value::as_str).map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> RoutingSettings {
        RoutingSettings {
            channel_address_id: "chan-1".to_string(),
            recipient_id: "alice".to_string(),
            authorization_context: "ctx".to_string(),
            channel_field: "channelAddressIdentifier".to_string(),
            payload_field: "payload".to_string(),
            recipient_field: "recipient".to_string(),
            type_field: "type".to_string(),
        }
    }

    fn typed_event(envelope: Value) -> DecodedEvent {
        DecodedEvent {
            replay_cursor: "100".to_string(),
            fields: json!({
                "type": "Interaction",
                "payload": envelope.to_string()
            }),
        }
    }

    fn envelope(channel: &str, subject: &str, payload: Value) -> Value {
        json!({
            "channelAddressIdentifier": channel,
            "recipient": {"appType": "11", "subject": subject, "role": "4"},
            "payload": payload
        })
    }

    #[test]
    fn typed_match_emits_exactly_one_record() {
        let event = typed_event(envelope("chan-1", "alice", json!({"text": "hello"})));

        let record = route_event(&event, &settings()).unwrap();
        assert_eq!(record.message_text, "hello");
        assert_eq!(record.channel_address_id, "chan-1");
        assert_eq!(record.recipient_id, "alice");
        assert_eq!(record.attachment_name, None);
        assert_eq!(record.attachment_url, None);
    }

    #[test]
    fn channel_mismatch_is_silently_discarded() {
        let event = typed_event(envelope("chan-other", "alice", json!({"text": "hello"})));
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn recipient_mismatch_is_silently_discarded() {
        let event = typed_event(envelope("chan-1", "mallory", json!({"text": "hello"})));
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn unsupported_type_value_is_discarded() {
        let event = DecodedEvent {
            replay_cursor: "1".to_string(),
            fields: json!({"type": "RoutingResult", "payload": "{}"}),
        };
        assert_eq!(classify(&event.fields, &settings()), EventShape::Unsupported);
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn null_type_field_counts_as_legacy() {
        let fields = json!({"type": null, "channelAddressIdentifier": "chan-1"});
        assert_eq!(classify(&fields, &settings()), EventShape::Legacy);
    }

    #[test]
    fn legacy_shape_with_all_fields_matching_emits_one_record() {
        let event = DecodedEvent {
            replay_cursor: "5".to_string(),
            fields: json!({
                "channelAddressIdentifier": "chan-1",
                "payload": json!({"text": "legacy hi"}).to_string(),
                "recipient": json!({"subject": "alice"}).to_string()
            }),
        };

        let record = route_event(&event, &settings()).unwrap();
        assert_eq!(record.message_text, "legacy hi");
        assert_eq!(record.attachment_name, None);
    }

    #[test]
    fn attachment_fields_come_from_first_attachment() {
        let payload = json!({
            "text": "see attached",
            "formatType": "Attachments",
            "attachments": [
                {"name": "a.png", "url": "http://x/a.png"},
                {"name": "b.png", "url": "http://x/b.png"}
            ]
        });
        let event = typed_event(envelope("chan-1", "alice", payload));

        let record = route_event(&event, &settings()).unwrap();
        assert_eq!(record.attachment_name.as_deref(), Some("a.png"));
        assert_eq!(record.attachment_url.as_deref(), Some("http://x/a.png"));
    }

    #[test]
    fn empty_attachment_list_yields_absent_attachment_fields() {
        let payload = json!({
            "text": "nothing attached",
            "formatType": "Attachments",
            "attachments": []
        });
        let event = typed_event(envelope("chan-1", "alice", payload));

        let record = route_event(&event, &settings()).unwrap();
        assert_eq!(record.attachment_name, None);
        assert_eq!(record.attachment_url, None);
    }

    #[test]
    fn malformed_envelope_json_is_discarded_not_fatal() {
        let event = DecodedEvent {
            replay_cursor: "9".to_string(),
            fields: json!({"type": "Interaction", "payload": "{not json"}),
        };
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn missing_text_discards_the_event() {
        let event = typed_event(envelope("chan-1", "alice", json!({"formatType": "Text"})));
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn missing_recipient_subject_discards_the_event() {
        let event = typed_event(json!({
            "channelAddressIdentifier": "chan-1",
            "recipient": {"appType": "11"},
            "payload": {"text": "hi"}
        }));
        assert_eq!(route_event(&event, &settings()), None);
    }

    #[test]
    fn wire_serialization_uses_push_channel_names() {
        let record = ReplyRecord {
            channel_address_id: "chan-1".to_string(),
            message_text: "hi".to_string(),
            attachment_name: Some("a.png".to_string()),
            attachment_url: Some("http://x/a.png".to_string()),
            recipient_id: "alice".to_string(),
        };

        let v: Value = serde_json::to_value(&record).unwrap();
        assert_eq!(v["channelAddressIdFieldVal"], "chan-1");
        assert_eq!(v["replyMessageText"], "hi");
        assert_eq!(v["attachmentName"], "a.png");
        assert_eq!(v["attachmentUrl"], "http://x/a.png");
        assert_eq!(v["recipientUserName"], "alice");
    }

    #[test]
    fn absent_attachments_are_omitted_from_the_wire() {
        let record = ReplyRecord {
            channel_address_id: "chan-1".to_string(),
            message_text: "hi".to_string(),
            attachment_name: None,
            attachment_url: None,
            recipient_id: "alice".to_string(),
        };

        let v: Value = serde_json::to_value(&record).unwrap();
        assert!(v.get("attachmentName").is_none());
        assert!(v.get("attachmentUrl").is_none());
    }
}
