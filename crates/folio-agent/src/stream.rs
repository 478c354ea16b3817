use serde::{Deserialize, Serialize};

/// Events emitted while an answer is being generated.
///
/// Consumers (the HTTP handler, the CLI) receive partial text as it arrives
/// from the provider and learn how the stream ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of answer text.
    TextDelta {
        /// Text to append.
        text: String,
    },

    /// The stream has finished successfully.
    Done,

    /// The stream ended with an error.
    Error {
        /// Message safe to show to the caller.
        message: String,
    },
}
