//! Client side of the relay.
//!
//! Opens feature requests against the gateway, decodes the streamed
//! response and republishes text deltas as they arrive.

pub mod api;
pub mod consumer;
pub mod session;
pub mod sse;

pub use api::GatewayClient;
pub use consumer::{read_stream, read_stream_with_cancel, StreamOutcome};
pub use session::{AiSession, SessionPhase};
pub use sse::{SseDecoder, SseEvent};
