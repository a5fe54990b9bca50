pub mod cli;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod purge;
pub mod routing;
pub mod runtime;
pub mod session;

pub use config::SessionSettings;
pub use dispatch::{handler, Bindings, MessageHandler, MessageType};
pub use document::{
    build_default, merge, ConfigurationDocument, DocumentOverrides, DocumentStore, EndpointEntry,
    Transport,
};
pub use error::{Result, SessionError};
pub use purge::{purge_stale_locks, PurgePolicy, PurgeReport};
pub use routing::{Admission, RoutingCoordinator};
pub use runtime::{LoopbackRuntime, Runtime, RuntimeCall};
pub use session::{
    ApplicationIdentity, Role, RoleCell, Session, SessionHost, SessionOptions, SessionState,
};
