//! Inbound webhook: payload model and the dispatcher that drives one request to a reply.

mod dispatcher;
pub mod payload;

pub use dispatcher::{is_reset_command, Dispatcher, HandshakeParams, RESET_REPLY};
pub use payload::InboundMessage;
