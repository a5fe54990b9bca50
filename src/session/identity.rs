//! Application identity

use serde::{Deserialize, Serialize};

/// Immutable identity of one logical endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub name: String,
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    pub minor_version: u8,
}

impl ApplicationIdentity {
    pub fn new(name: impl Into<String>, service_id: u16, instance_id: u16) -> Self {
        Self {
            name: name.into(),
            service_id,
            instance_id,
            major_version: 0x00,
            minor_version: 0x00,
        }
    }

    pub fn with_version(mut self, major: u8, minor: u8) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn version(&self) -> (u8, u8) {
        (self.major_version, self.minor_version)
    }
}

impl std::fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:04x}.{:04x} v{}.{}]",
            self.name, self.service_id, self.instance_id, self.major_version, self.minor_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let identity = ApplicationIdentity::new("svc", 0x1234, 0x5678).with_version(0x0A, 0x01);
        assert_eq!(identity.to_string(), "svc [1234.5678 v10.1]");
        assert_eq!(identity.version(), (0x0A, 0x01));
    }
}
