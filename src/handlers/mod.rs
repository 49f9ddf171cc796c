//! Consumers for messages addressed to this service.

mod inbound;

pub use inbound::{InboundCommand, InboundHandler, SAVE_RECORD};
