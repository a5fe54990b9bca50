//! Identifier -> handler registry

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::callback::MessageHandler;
use super::message_type::MessageType;

/// Message and event bindings of one session. Last registration wins.
#[derive(Default)]
pub struct Bindings {
    handlers: RwLock<HashMap<u16, MessageHandler>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `id`, returning whether an earlier binding was replaced
    pub fn bind(&self, id: u16, handler: MessageHandler) -> bool {
        self.handlers.write().insert(id, handler).is_some()
    }

    pub fn get(&self, id: u16) -> Option<MessageHandler> {
        self.handlers.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.handlers.read().contains_key(&id)
    }

    /// Bound identifiers in ascending order
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.handlers.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Route an inbound message to its handler.
    ///
    /// The registry lock is released before the handler runs, so handlers may
    /// bind further identifiers.
    pub fn dispatch(&self, message_type: MessageType, id: u16, payload: &[u8]) -> Option<Vec<u8>> {
        let Some(handler) = self.get(id) else {
            debug!("No binding for {} id {:#06x}, dropping", message_type, id);
            return None;
        };
        handler(message_type, id, payload)
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings").field("ids", &self.ids()).finish()
    }
}
