//! airelay - streaming relay between browser clients and an LLM provider
//!
//! This library provides the gateway that forwards feature requests to an
//! OpenAI-compatible chat-completion API, and the client-side consumer that
//! turns the relayed stream back into text deltas.

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;

pub use config::Config;
pub use error::Error;
