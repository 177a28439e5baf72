//! JSON reply shaping for the command protocol
//!
//! Successful replies are `{"state":"success","message":...}` objects that
//! handlers extend with extra fields; errors are
//! `{"state":"error","message":...}`.

use serde_json::{json, Value};

use crate::error::ChatError;

/// Build a success reply with the given message
pub fn make_success_message(message: impl Into<String>) -> Value {
    json!({
        "state": "success",
        "message": message.into(),
    })
}

/// Build an error reply with the given message
pub fn make_error_message(message: impl Into<String>) -> Value {
    json!({
        "state": "error",
        "message": message.into(),
    })
}

/// Build the error reply for a failed handler
///
/// Release builds answer with a generic message; debug builds carry the
/// error text to ease client development.
pub fn make_handler_error(err: &ChatError) -> Value {
    if cfg!(debug_assertions) {
        make_error_message(format!("Unknown error occured: {}", err))
    } else {
        make_error_message("Unknown error occured!")
    }
}

/// Attach an extra field to a success reply
pub fn with_field(mut reply: Value, key: &str, value: Value) -> Value {
    if let Some(map) = reply.as_object_mut() {
        map.insert(key.to_string(), value);
    }
    reply
}
