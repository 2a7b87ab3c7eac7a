use serde_json::Value;

use crate::bus::Event;

/// Convert an answered event into an SMPP command status.
///
/// An explicit numeric `command_status` field wins and passes verbatim, so
/// handlers can nack with any protocol status. Otherwise a numeric result is
/// taken as the status, a `true` result means success, and anything else
/// falls back to the caller's failure status.
pub fn decision_status(event: &Event, default_failure: u32) -> u32 {
    if let Some(status) = event.get_u32("command_status") {
        return status;
    }
    match &event.result {
        Some(Value::Number(n)) => n.as_u64().map(|v| v as u32).unwrap_or(default_failure),
        Some(Value::Bool(true)) => 0,
        _ => default_failure,
    }
}

/// Whether a connect decision admits the peer. Only an explicit yes counts;
/// an unanswered event, an error, or any unrecognised result rejects.
pub fn accepted(event: &Event) -> bool {
    if event.error.is_some() {
        return false;
    }
    match &event.result {
        Some(Value::Bool(true)) => true,
        Some(Value::String(s)) => matches!(s.as_str(), "accept" | "yes"),
        _ => false,
    }
}
