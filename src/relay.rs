//! Message Relay: validates boundary messages and routes them.
//!
//! The boundary schema is `{"type": "log" | "warn" | "error", "args": [..]}`.
//! Anything else is dropped without complaint; the isolated context is
//! untrusted and may post arbitrary data to its parent.

use crate::locate::ErrorLocator;
use crate::{ConsoleEvent, ConsoleKind, ErrorLocation};
use log::debug;
use serde_json::Value;

/// A validated boundary message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryMessage {
    pub kind: ConsoleKind,
    pub args: Vec<String>,
}

/// Where a message goes after validation
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Event for the console renderer
    pub event: ConsoleEvent,
    /// Highlight request for error events whose stack resolved to a line
    pub location: Option<ErrorLocation>,
}

/// Validate an already-decoded message value.
pub fn parse_value(value: &Value) -> Option<BoundaryMessage> {
    let obj = value.as_object()?;
    let kind = ConsoleKind::parse(obj.get("type")?.as_str()?)?;
    let args = obj
        .get("args")?
        .as_array()?
        .iter()
        .map(|a| match a {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Some(BoundaryMessage { kind, args })
}

/// Validate raw JSON text as posted by the shim.
pub fn parse_message(raw: &str) -> Option<BoundaryMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    parse_value(&value)
}

/// Route one boundary message.
///
/// Malformed input yields `None`. Error events carrying a stack in
/// `args[1]` are handed to the locator.
pub fn on_boundary_message(raw: &str, locator: &ErrorLocator) -> Option<Routed> {
    let Some(msg) = parse_message(raw) else {
        debug!("discarding malformed boundary message: {:.120}", raw);
        return None;
    };

    let event = ConsoleEvent {
        kind: msg.kind,
        payload: msg.args,
        timestamp: chrono::Utc::now(),
    };
    let location = event.stack().and_then(|stack| locator.locate(stack));
    Some(Routed { event, location })
}
