//! Gateway: the HTTP server exposing the webhook endpoint.
//!
//! One route serves both methods: GET for the platform's subscribe handshake, POST for events.

mod server;

pub use server::{build_dispatcher, router, run_gateway, GatewayState};
