//! Control and event message types for the operator ⇄ daemon channel.
//!
//! Requests are tagged by `action`, events by `type`, both in camelCase on
//! the wire. The shapes mirror what the two sides actually need: control
//! messages flow from the CLI to the daemon, events flow back and are
//! broadcast to every connected operator.

use crate::roster::Contact;
use serde::{Deserialize, Serialize};

// ── Control messages (operator → daemon) ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Start a batch over an already-ingested contact list.
    #[serde(rename_all = "camelCase")]
    StartSending { data: Vec<Contact> },

    /// Ingest a file payload previously written to the spool.
    #[serde(rename_all = "camelCase")]
    ProcessFileFromStorage {
        storage_key: String,
        file_name: String,
        file_type: String,
    },

    /// Ingest a file whose bytes ride inline (base64) in the message; the
    /// daemon routes them through its own spool before ingesting.
    #[serde(rename_all = "camelCase")]
    ProcessFileInBackground {
        file_array_buffer: String,
        file_name: String,
        file_type: String,
    },

    /// Readiness handshake. The daemon answers with [`EventMessage::Ready`];
    /// this is the only readiness signal.
    IsContentScriptReady,
}

// ── Event messages (daemon → operator) ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventMessage {
    /// Batch progress. `progress` is a 0–100 percentage; `completed` marks
    /// the final event of a run.
    Status {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<bool>,
    },

    /// Fatal run or transport failure.
    Error { text: String },

    /// The imported table was structurally rejected.
    ValidationError { text: String },

    /// A validated, expansion-complete contact list is available.
    DataReady { data: Vec<Contact>, text: String },

    /// The previous contact list was discarded (empty or replaced file).
    DataCleared { text: String },

    /// Reply to [`ControlMessage::IsContentScriptReady`].
    Ready { ready: bool },
}

impl EventMessage {
    /// Plain progress update during a run.
    pub fn status(text: impl Into<String>, progress: f64) -> Self {
        EventMessage::Status {
            text: text.into(),
            progress: Some(progress),
            completed: None,
        }
    }

    /// Final event of a run, successful or interrupted.
    pub fn completed(text: impl Into<String>, progress: f64) -> Self {
        EventMessage::Status {
            text: text.into(),
            progress: Some(progress),
            completed: Some(true),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        EventMessage::Error { text: text.into() }
    }
}
