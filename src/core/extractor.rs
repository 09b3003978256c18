//! Locating the deadlock diagnostic inside an event payload
//!
//! Events from the issue tracker arrive as JSON with a handful of known
//! shapes. Only the fields below are inspected, in this order:
//! 1. `message`
//! 2. `logentry.formatted`, then `logentry.message`
//! 3. `exception.values[].value`
//! 4. `entries[].data.values[].value` for entries of type `exception`

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

lazy_static::lazy_static! {
    static ref WAITS_FOR_ANCHOR: Regex = Regex::new(r"Process\s+\d+\s+waits\s+for").unwrap();
}

const HEADLINE: &str = "deadlock detected";

/// An event as delivered by the issue tracker
///
/// A bare JSON string is treated as raw log text; a JSON object must match
/// the [`StructuredEvent`] shape. Any other JSON value is rejected.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    RawText(String),
    Structured(StructuredEvent),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StructuredEvent {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub logentry: Option<LogEntryInterface>,
    #[serde(default)]
    pub exception: Option<ExceptionInterface>,
    #[serde(default)]
    pub entries: Vec<EventEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LogEntryInterface {
    #[serde(default)]
    pub formatted: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExceptionInterface {
    #[serde(default)]
    pub values: Vec<ExceptionValue>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExceptionValue {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// One item of the event's `entries` list
///
/// `data` differs per entry type and is kept as raw JSON; only entries of
/// type `exception` are read.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EventEntry {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEntry {
    /// `data.values[].value` strings of an `exception` entry
    pub fn exception_values(&self) -> impl Iterator<Item = &str> {
        let values = match self.kind.as_str() {
            "exception" => self.data.get("values").and_then(Value::as_array),
            _ => None,
        };
        values
            .into_iter()
            .flatten()
            .filter_map(|value| value.get("value").and_then(Value::as_str))
    }
}

impl EventPayload {
    /// Deserialize a payload from JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<&str> for EventPayload {
    fn from(text: &str) -> Self {
        EventPayload::RawText(text.to_string())
    }
}

impl From<String> for EventPayload {
    fn from(text: String) -> Self {
        EventPayload::RawText(text)
    }
}

/// Whether a string looks like a PostgreSQL deadlock report
pub fn has_deadlock_signature(text: &str) -> bool {
    text.to_ascii_lowercase().contains(HEADLINE) || WAITS_FOR_ANCHOR.is_match(text)
}

/// Find the deadlock diagnostic inside `payload`
///
/// Returns the first matching string verbatim, or `None` when no inspected
/// field carries a deadlock signature.
pub fn extract(payload: &EventPayload) -> Option<&str> {
    match payload {
        EventPayload::RawText(text) => has_deadlock_signature(text).then_some(text.as_str()),
        EventPayload::Structured(event) => extract_structured(event),
    }
}

fn extract_structured(event: &StructuredEvent) -> Option<&str> {
    let logentry = event.logentry.as_ref();
    let exception_values = event
        .exception
        .iter()
        .flat_map(|exception| exception.values.iter())
        .filter_map(|value| value.value.as_deref());
    let entry_values = event
        .entries
        .iter()
        .flat_map(EventEntry::exception_values);

    event
        .message
        .as_deref()
        .into_iter()
        .chain(logentry.and_then(|l| l.formatted.as_deref()))
        .chain(logentry.and_then(|l| l.message.as_deref()))
        .chain(exception_values)
        .chain(entry_values)
        .find(|candidate| has_deadlock_signature(candidate))
}
