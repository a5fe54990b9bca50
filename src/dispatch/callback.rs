//! Handler capability and the session default

use std::sync::Arc;
use tracing::debug;

use super::message_type::MessageType;
use crate::session::RoleCell;

/// Callback bound to a message or event identifier.
///
/// Receives `(message_type, id, payload)`; a returned payload is sent back as
/// the response. Runs on whatever thread the runtime delivers on.
pub type MessageHandler = Arc<dyn Fn(MessageType, u16, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Wrap a closure as a [`MessageHandler`]
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(MessageType, u16, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler installed when a binding is registered without one.
///
/// Services echo the payload back as the response; anything else never
/// responds. The role is read at call time.
pub fn default_handler(name: impl Into<String>, role: Arc<RoleCell>) -> MessageHandler {
    let name = name.into();
    Arc::new(move |message_type, id, payload| {
        debug!(
            "{} -> {} id: {:#06x}, data: {}",
            name,
            message_type,
            id,
            hex::encode(payload)
        );
        if role.is_service() {
            Some(payload.to_vec())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_default_handler_echoes_for_service() {
        let role = Arc::new(RoleCell::new());
        role.assign(Role::Service);
        let callback = default_handler("svc", role);

        let payload = [0x01, 0x02, 0x03];
        let first = callback(MessageType::Request, 0x9002, &payload);
        let second = callback(MessageType::Request, 0x9002, &payload);
        assert_eq!(first, Some(payload.to_vec()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_handler_silent_for_client() {
        let role = Arc::new(RoleCell::new());
        let callback = default_handler("cli", role.clone());
        assert_eq!(callback(MessageType::Response, 0x9002, &[0x01]), None);

        role.assign(Role::Client);
        assert_eq!(callback(MessageType::Response, 0x9002, &[0x01]), None);
    }

    #[test]
    fn test_default_handler_follows_late_role_assignment() {
        let role = Arc::new(RoleCell::new());
        let callback = default_handler("svc", role.clone());
        assert_eq!(callback(MessageType::Request, 1, &[0xAA]), None);

        role.assign(Role::Service);
        assert_eq!(callback(MessageType::Request, 1, &[0xAA]), Some(vec![0xAA]));
    }
}
