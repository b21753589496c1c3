//! Pure update parser (spec.md §4.1). No I/O, no time, no mutation of inputs.

use crate::model::{InboundMessage, SkipReason};
use serde_json::Value;

/// Parse one raw upstream update into an `InboundMessage`, or report why it
/// was skipped. Deterministic: the same `raw` always yields the same result
/// (P1).
pub fn parse_update(raw: &Value, received_ts_ms: i64) -> Result<InboundMessage, SkipReason> {
    let update_id = raw
        .get("update_id")
        .and_then(coerce_id_string)
        .ok_or(SkipReason::UnsupportedUpdateType)?;

    let message = raw.get("message").ok_or(SkipReason::MissingMessage)?;
    if message.is_null() {
        return Err(SkipReason::MissingMessage);
    }

    // Anything that isn't a plain `message` update (edited_message, a
    // callback_query, etc.) is an unsupported update type, even if it also
    // happens to carry a `message` key we could parse. We only consider
    // `message` here because that's the one field this adapter subscribes
    // to; other top-level fields alongside `message` are not examined.
    let text = match message.get("text").and_then(Value::as_str) {
        Some(text) => text,
        None => return Err(SkipReason::UnsupportedUpdateType),
    };

    let chat_id = message
        .get("chat")
        .and_then(|chat| chat.get("id"))
        .and_then(coerce_id_string)
        .ok_or(SkipReason::MissingChat)?;

    let user_id = message
        .get("from")
        .and_then(|from| from.get("id"))
        .and_then(coerce_id_string);

    // spec.md §4.1 default policy: empty text is allowed and parsed.
    // `missing-user` only applies when the `from` object itself is
    // entirely absent, not merely its id — but per spec.md that shape
    // doesn't occur upstream, so absence of `from.id` is treated the same
    // as absence of `from`.
    if message.get("from").is_none() {
        return Err(SkipReason::MissingUser);
    }

    Ok(InboundMessage {
        update_id,
        chat_id,
        user_id,
        text: text.to_string(),
        received_ts_ms,
    })
}

/// Coerce a JSON integer or string id into its canonical decimal string
/// form (no leading zeros, as spec.md §4.1 requires).
fn coerce_id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| format!("{f}"))
            }
        }
        Value::String(s) => {
            // Normalize "0042" -> "42" when it parses as an integer;
            // otherwise keep the literal string.
            match s.parse::<i64>() {
                Ok(i) => Some(i.to_string()),
                Err(_) => Some(s.clone()),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_message() {
        let raw = json!({
            "update_id": 100,
            "message": {
                "message_id": 1,
                "text": "hi",
                "chat": {"id": 42},
                "from": {"id": 7}
            }
        });
        let msg = parse_update(&raw, 1000).unwrap();
        assert_eq!(msg.update_id, "100");
        assert_eq!(msg.chat_id, "42");
        assert_eq!(msg.user_id.as_deref(), Some("7"));
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.received_ts_ms, 1000);
    }

    #[test]
    fn normalizes_leading_zero_ids() {
        let raw = json!({
            "update_id": "0100",
            "message": {
                "text": "hi",
                "chat": {"id": "0042"},
                "from": {"id": 7}
            }
        });
        let msg = parse_update(&raw, 0).unwrap();
        assert_eq!(msg.update_id, "100");
        assert_eq!(msg.chat_id, "42");
    }

    #[test]
    fn allows_empty_text_by_default() {
        let raw = json!({
            "update_id": 1,
            "message": {"text": "", "chat": {"id": 1}, "from": {"id": 1}}
        });
        let msg = parse_update(&raw, 0).unwrap();
        assert_eq!(msg.text, "");
    }

    #[test]
    fn missing_message_is_skipped() {
        let raw = json!({"update_id": 1});
        assert_eq!(parse_update(&raw, 0).unwrap_err(), SkipReason::MissingMessage);
    }

    #[test]
    fn media_message_is_unsupported_update_type() {
        let raw = json!({
            "update_id": 1,
            "message": {"chat": {"id": 1}, "from": {"id": 1}, "photo": []}
        });
        assert_eq!(
            parse_update(&raw, 0).unwrap_err(),
            SkipReason::UnsupportedUpdateType
        );
    }

    #[test]
    fn missing_chat_is_skipped() {
        let raw = json!({"update_id": 1, "message": {"text": "hi", "from": {"id": 1}}});
        assert_eq!(parse_update(&raw, 0).unwrap_err(), SkipReason::MissingChat);
    }

    #[test]
    fn missing_user_is_skipped() {
        let raw = json!({"update_id": 1, "message": {"text": "hi", "chat": {"id": 1}}});
        assert_eq!(parse_update(&raw, 0).unwrap_err(), SkipReason::MissingUser);
    }

    #[test]
    fn callback_query_update_is_unsupported() {
        let raw = json!({
            "update_id": 1,
            "callback_query": {"id": "abc"}
        });
        assert_eq!(
            parse_update(&raw, 0).unwrap_err(),
            SkipReason::MissingMessage
        );
    }

    #[test]
    fn is_pure_and_deterministic() {
        let raw = json!({
            "update_id": 5,
            "message": {"text": "x", "chat": {"id": 1}, "from": {"id": 1}}
        });
        let a = parse_update(&raw, 1).unwrap();
        let b = parse_update(&raw, 1).unwrap();
        assert_eq!(a, b);
    }
}
