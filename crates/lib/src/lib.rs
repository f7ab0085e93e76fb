//! WhatsApp relay core library: webhook authentication, duplicate suppression,
//! conversation history, AI completion, and outbound delivery.

pub mod channels;
pub mod config;
pub mod dedup;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod outcome;
pub mod signature;
pub mod store;
pub mod webhook;
