//! Session lifecycle and role tracking

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not yet admitted by the coordinator
    Uninitialized,
    /// Application handle exists, events are not processed yet
    Created,
    /// Runtime is processing events for the application
    Started,
    /// Terminal; a new session must be created to rejoin
    Stopped,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Started)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Created => write!(f, "created"),
            SessionState::Started => write!(f, "started"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Role an application plays on the SOME/IP network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Unassigned,
    Service,
    Client,
}

impl Role {
    fn as_u8(self) -> u8 {
        match self {
            Role::Unassigned => 0,
            Role::Service => 1,
            Role::Client => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Role::Service,
            2 => Role::Client,
            _ => Role::Unassigned,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unassigned => write!(f, "unassigned"),
            Role::Service => write!(f, "service"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Role flag shared between a session and the handlers it installs.
///
/// The role leaves `Unassigned` at most once.
#[derive(Debug, Default)]
pub struct RoleCell(AtomicU8);

impl RoleCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Role {
        Role::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_service(&self) -> bool {
        self.get() == Role::Service
    }

    /// Assign `role` if none is set yet; returns the role in effect afterwards.
    pub fn assign(&self, role: Role) -> Role {
        match self.0.compare_exchange(
            Role::Unassigned.as_u8(),
            role.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => role,
            Err(current) => Role::from_u8(current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_assigned_once() {
        let cell = RoleCell::new();
        assert_eq!(cell.get(), Role::Unassigned);
        assert_eq!(cell.assign(Role::Service), Role::Service);
        assert_eq!(cell.assign(Role::Client), Role::Service);
        assert!(cell.is_service());
    }

    #[test]
    fn test_state_checks() {
        assert!(SessionState::Stopped.is_terminal());
        assert!(!SessionState::Created.is_terminal());
        assert!(SessionState::Started.is_running());
        assert_eq!(SessionState::Created.to_string(), "created");
    }
}
