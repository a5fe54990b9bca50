//! Routing Coordinator
//!
//! Process-wide agreement on which application acts as the runtime's routing
//! manager.

pub mod coordinator;

pub use coordinator::{Admission, RoutingCoordinator};
