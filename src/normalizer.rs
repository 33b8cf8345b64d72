//! Converts raw feed frames into [`Event`]s.
//!
//! Wire schema (field names are the contract with the producer):
//!
//! | wire          | event field    | when missing or mistyped        |
//! |---------------|----------------|---------------------------------|
//! | `id`          | `id`           | random UUID                     |
//! | `type`        | `kind`         | `claim_updated`                 |
//! | `title`       | `title`        | derived from `kind`             |
//! | `description` | `description`  | `None`                          |
//! | `timestamp`   | `occurred_at`  | receipt time, marked estimated  |
//! | `claimId`     | `subject_id`   | `None`                          |
//! | `severity`    | `severity`     | `None` (also for unknown value) |
//!
//! Only payloads that are not a JSON object are dropped.

use crate::event::{Event, EventKind, Severity};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Kind assumed when the producer omits `type`
const FALLBACK_KIND: &str = "claim_updated";

/// Scalar fields producers send as either strings or numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(n) => n.to_string(),
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
        }
    }
}

/// Optional field that tolerates a value of the wrong JSON type
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<Scalar>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<Scalar>,
    #[serde(default, deserialize_with = "lenient")]
    claim_id: Option<Scalar>,
    #[serde(default, deserialize_with = "lenient")]
    severity: Option<String>,
}

/// Normalize a transport frame.
///
/// Returns `None` for frames that carry no event: control frames, binary
/// frames and malformed text. Never panics on untrusted input.
pub fn normalize_frame(message: &Message, received_at: DateTime<Utc>) -> Option<Event> {
    match message {
        Message::Text(text) => normalize_text(text.as_str(), received_at),
        Message::Binary(data) => {
            debug!("[NORMALIZER] Dropping binary frame ({} bytes)", data.len());
            None
        }
        _ => None,
    }
}

/// Normalize a JSON text payload.
pub fn normalize_text(payload: &str, received_at: DateTime<Utc>) -> Option<Event> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "[NORMALIZER] Dropping malformed frame: {} (payload: {})",
                e,
                preview(payload)
            );
            return None;
        }
    };
    if !value.is_object() {
        warn!(
            "[NORMALIZER] Dropping non-object frame (payload: {})",
            preview(payload)
        );
        return None;
    }
    let raw = match RawEvent::deserialize(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("[NORMALIZER] Dropping unreadable frame: {}", e);
            return None;
        }
    };

    let tag = raw
        .kind
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| FALLBACK_KIND.to_string());
    let kind = EventKind::from_wire(&tag);
    if !kind.is_known() {
        trace!("[NORMALIZER] Passing through unknown kind {:?}", tag);
    }

    let id = raw
        .id
        .map(Scalar::into_text)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let title = raw
        .title
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| kind.default_title());

    let (occurred_at, timestamp_is_estimated) =
        match raw.timestamp.and_then(|ts| parse_timestamp(ts, &id)) {
            Some(at) => (at, false),
            None => (received_at, true),
        };

    let severity = raw.severity.and_then(|value| {
        let parsed = Severity::from_wire(&value);
        if parsed.is_none() {
            debug!("[NORMALIZER] Ignoring unknown severity {:?} on {}", value, id);
        }
        parsed
    });

    Some(Event {
        id,
        kind,
        title,
        description: raw.description,
        occurred_at,
        timestamp_is_estimated,
        subject_id: raw.claim_id.map(Scalar::into_text),
        severity,
    })
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: Scalar, event_id: &str) -> Option<DateTime<Utc>> {
    let parsed = match &value {
        Scalar::Text(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Scalar::Integer(millis) => Utc.timestamp_millis_opt(*millis).single(),
        Scalar::Unsigned(millis) => i64::try_from(*millis)
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Scalar::Float(millis) if millis.is_finite() => {
            Utc.timestamp_millis_opt(*millis as i64).single()
        }
        Scalar::Float(_) => None,
    };
    if parsed.is_none() {
        debug!(
            "[NORMALIZER] Unusable timestamp {:?} on {}, using receipt time",
            value, event_id
        );
    }
    parsed
}

fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(120) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}
