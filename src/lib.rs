// Messaging core for the parley marketplace client.
pub mod api;
pub mod chat;
pub mod directory;
pub mod error;
pub mod models;
pub mod store;

// Re-export the main types for convenience
pub use chat::{ChatClient, ChatEvent};
pub use error::ChatError;
pub use models::*;
pub use store::{DateGroup, MessageStore, SharedStore};
