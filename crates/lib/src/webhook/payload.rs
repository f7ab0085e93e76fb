//! WhatsApp Cloud API webhook envelope: `entry[0].changes[0].value.{messages, statuses, contacts}`.
//!
//! The envelope is navigated as a `serde_json::Value` because the platform mixes many event
//! shapes under the same path and only a few fields matter here.

use serde_json::Value;

/// A user message extracted from a webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub wa_id: String,
    pub name: String,
    pub message_id: String,
    /// Platform send time, seconds since the epoch.
    pub timestamp: i64,
    /// Text body; `None` for media and other non-text messages.
    pub text: Option<String>,
}

/// Missing or mistyped field while extracting a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message format: missing {0}")]
pub struct FormatError(pub &'static str);

/// Non-empty in the JSON sense: not null, false, 0, "", [] or {}.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `entry[0].changes[0].value`
fn change_value(body: &Value) -> Option<&Value> {
    body.get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")
}

/// True for delivery-status callbacks (`value.statuses` present and non-empty).
pub fn is_status_update(body: &Value) -> bool {
    change_value(body)
        .and_then(|v| v.get("statuses"))
        .map(truthy)
        .unwrap_or(false)
}

/// True when the body is a platform event carrying at least one message.
pub fn is_message_event(body: &Value) -> bool {
    body.get("object").map(truthy).unwrap_or(false)
        && change_value(body)
            .and_then(|v| v.get("messages"))
            .and_then(|m| m.get(0))
            .map(truthy)
            .unwrap_or(false)
}

fn str_field<'a>(v: Option<&'a Value>, name: &'static str) -> Result<&'a str, FormatError> {
    v.and_then(Value::as_str).ok_or(FormatError(name))
}

/// Pull sender and first message out of a body that passed [`is_message_event`].
pub fn extract_message(body: &Value) -> Result<InboundMessage, FormatError> {
    let value = change_value(body).ok_or(FormatError("entry[0].changes[0].value"))?;
    let contact = value.get("contacts").and_then(|c| c.get(0));
    let wa_id = str_field(contact.and_then(|c| c.get("wa_id")), "contacts[0].wa_id")?;
    let name = str_field(
        contact.and_then(|c| c.get("profile")).and_then(|p| p.get("name")),
        "contacts[0].profile.name",
    )?;
    let message = value
        .get("messages")
        .and_then(|m| m.get(0))
        .ok_or(FormatError("messages[0]"))?;
    let message_id = str_field(message.get("id"), "messages[0].id")?;
    let timestamp = match message.get("timestamp") {
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
    .ok_or(FormatError("messages[0].timestamp"))?;
    let text = message
        .get("text")
        .and_then(|t| t.get("body"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(InboundMessage {
        wa_id: wa_id.to_string(),
        name: name.to_string(),
        message_id: message_id.to_string(),
        timestamp,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_event() -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{ "profile": { "name": "Ana" }, "wa_id": "15551234567" }],
                        "messages": [{
                            "from": "15551234567",
                            "id": "wamid.ABC",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": "Hi there" }
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn extracts_text_message() {
        let body = text_event();
        assert!(is_message_event(&body));
        assert!(!is_status_update(&body));
        let m = extract_message(&body).unwrap();
        assert_eq!(m.wa_id, "15551234567");
        assert_eq!(m.name, "Ana");
        assert_eq!(m.message_id, "wamid.ABC");
        assert_eq!(m.timestamp, 1_700_000_000);
        assert_eq!(m.text.as_deref(), Some("Hi there"));
    }

    #[test]
    fn status_callback_detected() {
        let body = json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "wamid.X", "status": "delivered" }] } }] }]
        });
        assert!(is_status_update(&body));
        assert!(!is_message_event(&body));
    }

    #[test]
    fn empty_statuses_is_not_a_status_update() {
        let body = json!({ "entry": [{ "changes": [{ "value": { "statuses": [] } }] }] });
        assert!(!is_status_update(&body));
    }

    #[test]
    fn missing_object_or_messages_is_not_an_event() {
        let mut body = text_event();
        body.as_object_mut().unwrap().remove("object");
        assert!(!is_message_event(&body));
        assert!(!is_message_event(&json!({ "object": "x", "entry": [] })));
        assert!(!is_message_event(&json!([1, 2, 3])));
    }

    #[test]
    fn missing_contact_is_format_error() {
        let mut body = text_event();
        body["entry"][0]["changes"][0]["value"]
            .as_object_mut()
            .unwrap()
            .remove("contacts");
        assert_eq!(extract_message(&body), Err(FormatError("contacts[0].wa_id")));
    }

    #[test]
    fn numeric_timestamp_and_media_message() {
        let mut body = text_event();
        let msg = &mut body["entry"][0]["changes"][0]["value"]["messages"][0];
        msg["timestamp"] = json!(1700000001);
        msg.as_object_mut().unwrap().remove("text");
        let m = extract_message(&body).unwrap();
        assert_eq!(m.timestamp, 1_700_000_001);
        assert_eq!(m.text, None);
    }
}
