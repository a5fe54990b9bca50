//! Message Dispatch
//!
//! Classifies inbound SOME/IP messages and routes them to the handlers a
//! session bound for each message or event identifier.

pub mod bindings;
pub mod callback;
pub mod message_type;

pub use bindings::Bindings;
pub use callback::{default_handler, handler, MessageHandler};
pub use message_type::MessageType;
