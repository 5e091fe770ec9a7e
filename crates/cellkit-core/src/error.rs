#![forbid(unsafe_code)]

//! Error type shared by every cellkit crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CellError>;

/// Errors surfaced by cell mutation, persistence, and registry operations.
///
/// A mutation that fails part-way has already stored its new value; the
/// error reports that the notification pass (or the durable write) did not
/// complete.
#[derive(Debug, Error)]
pub enum CellError {
    /// A fallible handler rejected the notification. Handlers after it in
    /// registration order were not invoked for that pass.
    #[error("handler failed: {message}")]
    Handler { message: String },

    /// The value of a persisted cell could not be serialized for the store.
    #[error("failed to serialize value for key {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The durable store refused a write.
    #[error("store rejected write for key {key}: {message}")]
    Storage { key: String, message: String },

    /// Registry removal refused: the cell still has live subscribers.
    #[error("cell {key} still has {subscribers} subscriber(s)")]
    RegistryBusy { key: String, subscribers: usize },

    /// A keyed lookup asked for a value type other than the registered one.
    #[error("cell {key} is registered with a different value type")]
    RegistryType { key: String },

    /// The cell backing a pending future was dropped before it resolved.
    #[error("cell dropped before the awaited value arrived")]
    Dropped,
}

impl CellError {
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }
}
