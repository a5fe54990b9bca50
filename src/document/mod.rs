//! Runtime configuration document
//!
//! Builds the document the middleware runtime reads at application creation:
//! an embedded default template layered with per-application overrides, and
//! persisted as key-sorted JSON.

pub mod builder;
pub mod store;
pub mod types;

pub use builder::{build_default, merge, DocumentOverrides};
pub use store::DocumentStore;
pub use types::{ApplicationEntry, ConfigurationDocument, EndpointEntry, Transport};
