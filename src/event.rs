use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Kind of claim activity reported by the event feed.
///
/// Kinds this crate does not know about are kept verbatim in
/// [`EventKind::Other`] so newer producers do not break older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    ClaimCreated,
    ClaimUpdated,
    ClaimResolved,
    FraudDetected,
    Reassigned,
    /// Unrecognized wire tag, preserved as received
    Other(String),
}

impl EventKind {
    /// Map a wire tag to a kind. Never fails.
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "claim_created" => EventKind::ClaimCreated,
            "claim_updated" => EventKind::ClaimUpdated,
            "claim_resolved" => EventKind::ClaimResolved,
            "fraud_detected" => EventKind::FraudDetected,
            "reassigned" => EventKind::Reassigned,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// The wire tag for this kind
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ClaimCreated => "claim_created",
            EventKind::ClaimUpdated => "claim_updated",
            EventKind::ClaimResolved => "claim_resolved",
            EventKind::FraudDetected => "fraud_detected",
            EventKind::Reassigned => "reassigned",
            EventKind::Other(tag) => tag,
        }
    }

    /// Generic title used when the producer did not send one
    pub fn default_title(&self) -> String {
        match self {
            EventKind::ClaimCreated => "Claim created".to_string(),
            EventKind::ClaimUpdated => "Claim updated".to_string(),
            EventKind::ClaimResolved => "Claim resolved".to_string(),
            EventKind::FraudDetected => "Fraud detected".to_string(),
            EventKind::Reassigned => "Claim reassigned".to_string(),
            EventKind::Other(tag) => humanize(tag),
        }
    }

    /// Whether this kind is one of the known claim activities
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

/// "policy_lapsed" -> "Policy lapsed"
fn humanize(tag: &str) -> String {
    let words = tag.replace(['_', '-'], " ");
    let trimmed = words.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Event".to_string(),
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EventKind::from_wire(&tag))
    }
}

/// Display priority hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Parse a wire value; unknown values yield `None`
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// A normalized claim event, as delivered to every subscriber.
///
/// Events are immutable once built; the bus shares one `Arc<Event>` across
/// all subscribers of a dispatch round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Producer id, or a generated UUID when the producer sent none
    pub id: String,
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    /// When the event happened.
    ///
    /// If `timestamp_is_estimated` is set this is the local receipt time,
    /// not the producer's event time.
    pub occurred_at: DateTime<Utc>,
    /// The producer sent no usable timestamp
    pub timestamp_is_estimated: bool,
    /// Claim this event refers to
    pub subject_id: Option<String>,
    pub severity: Option<Severity>,
}
