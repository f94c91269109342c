//! Streaming chat-completions client for an OpenAI-compatible endpoint,
//! authenticated with the token managed by `skylark-oauth`.

pub mod client;
pub mod error;
pub mod identity;
mod sse;
pub mod types;

pub use {
    client::{ChatClient, EventStream},
    error::{Error, Result},
    identity::ClientIdentity,
    types::{ChatMessage, Completion, Role, StreamEvent, Usage},
};
