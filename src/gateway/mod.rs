//! Gateway HTTP server.
//!
//! Accepts feature requests from browser clients, attaches the provider
//! credential and forwards a chat-completion request upstream. Chat and plan
//! replies are relayed as a byte stream; quiz replies are buffered and
//! parsed into JSON.

mod handlers;
pub mod quiz;
pub mod relay;
mod server;
pub mod types;
mod upstream;

pub use server::{build_http_client, create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use types::{ChatMessage, ChatRequest, Feature, QuizPayload, QuizReply, Role};
