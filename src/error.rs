// Error taxonomy for the messaging core.
// Transport and fetch errors are converted to these variants at the
// boundary; they never tear down a conversation view.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat channel could not be established. Surfaced to the caller
    /// as an offline indicator; the core does not retry silently beyond
    /// its bounded dial attempts.
    #[error("chat channel could not be established: {0}")]
    ConnectionUnavailable(String),

    /// A send was attempted while the channel is down. Callers are
    /// expected to check `is_connected()` first and disable send
    /// affordances while offline.
    #[error("send attempted while the channel is not connected")]
    NotConnected,

    /// A received or locally seeded record failed shape or date
    /// validation. Only the offending record is dropped; the rest of the
    /// batch is processed normally.
    #[error("malformed message record: {0}")]
    MalformedMessage(String),

    /// The history fetch from the marketplace backend failed. The view
    /// keeps whatever it already displays and may retry on the next poll
    /// tick.
    #[error("failed to fetch conversation history: {0}")]
    HistoryFetchFailure(String),

    /// A non-history marketplace API call failed (conversation list,
    /// REST send, identity lookup).
    #[error("marketplace api call failed: {0}")]
    ApiFailure(String),
}
