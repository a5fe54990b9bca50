//! Application sessions
//!
//! A [`Session`] wraps one SOME/IP application: it is admitted into the
//! process group through a [`SessionHost`], takes the service or client role
//! on its first role-bearing operation and keeps it until stopped.

mod host;
mod identity;
#[allow(clippy::module_inception)]
mod session;
mod state;

pub use host::{SessionHost, SessionOptions};
pub use identity::ApplicationIdentity;
pub use session::Session;
pub use state::{Role, RoleCell, SessionState};
