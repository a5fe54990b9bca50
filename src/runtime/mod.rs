//! Runtime Boundary
//!
//! Operations the session layer calls into the SOME/IP middleware runtime.
//! Discovery, serialization and network I/O all happen behind this trait.

pub mod loopback;

pub use loopback::{LoopbackRuntime, RuntimeCall};

use crate::dispatch::MessageHandler;
use crate::document::Transport;
use crate::error::Result;
use crate::session::ApplicationIdentity;

/// SOME/IP middleware runtime.
///
/// Every call names the application it acts for. Implementations report their
/// own failures as [`SessionError::Runtime`](crate::error::SessionError::Runtime);
/// sessions pass them on untranslated. Handlers registered through
/// [`Runtime::register_message`] may be invoked on any thread.
#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    /// Create the application handle; the configuration document is on disk by now
    fn create(&self, app: &ApplicationIdentity) -> Result<()>;

    /// Start event processing for the application
    fn start(&self, app: &ApplicationIdentity) -> Result<()>;

    fn stop(&self, app: &ApplicationIdentity) -> Result<()>;

    /// Ask for the service `app` names (client side)
    fn request_service(&self, app: &ApplicationIdentity) -> Result<()>;

    /// Send a method request
    fn send_service(
        &self,
        app: &ApplicationIdentity,
        method_id: u16,
        transport: Transport,
        payload: &[u8],
    ) -> Result<()>;

    fn register_message(
        &self,
        app: &ApplicationIdentity,
        id: u16,
        handler: MessageHandler,
    ) -> Result<()>;

    /// Subscribe to an event of the service `app` names
    fn request_event_service(
        &self,
        app: &ApplicationIdentity,
        event_id: u16,
        group: u16,
    ) -> Result<()>;

    /// Advertise the request-handling endpoint
    fn offer_service(&self, app: &ApplicationIdentity) -> Result<()>;

    fn offer_event_service(&self, app: &ApplicationIdentity, event_id: u16, group: u16)
        -> Result<()>;

    /// Publish an event payload to subscribed clients
    fn notify_clients(&self, app: &ApplicationIdentity, event_id: u16, payload: &[u8])
        -> Result<()>;
}
