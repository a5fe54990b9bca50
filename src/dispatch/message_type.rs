//! SOME/IP message types

use serde::{Deserialize, Serialize};

/// Message type field of a SOME/IP header.
///
/// Values the runtime reports that are not listed here map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    RequestNoReturn,
    Notification,
    RequestAck,
    RequestNoReturnAck,
    NotificationAck,
    Response,
    Error,
    ResponseAck,
    ErrorAck,
    Unknown,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Request => 0x00,
            MessageType::RequestNoReturn => 0x01,
            MessageType::Notification => 0x02,
            MessageType::RequestAck => 0x40,
            MessageType::RequestNoReturnAck => 0x41,
            MessageType::NotificationAck => 0x42,
            MessageType::Response => 0x80,
            MessageType::Error => 0x81,
            MessageType::ResponseAck => 0xC0,
            MessageType::ErrorAck => 0xC1,
            MessageType::Unknown => 0xFF,
        }
    }

    /// Acknowledgment variants carry the 0x40 flag
    pub fn is_ack(&self) -> bool {
        !matches!(self, MessageType::Unknown) && self.as_u8() & 0x40 != 0
    }

    /// Only a plain request obliges the receiver to answer
    pub fn expects_response(&self) -> bool {
        matches!(self, MessageType::Request)
    }
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MessageType::Request,
            0x01 => MessageType::RequestNoReturn,
            0x02 => MessageType::Notification,
            0x40 => MessageType::RequestAck,
            0x41 => MessageType::RequestNoReturnAck,
            0x42 => MessageType::NotificationAck,
            0x80 => MessageType::Response,
            0x81 => MessageType::Error,
            0xC0 => MessageType::ResponseAck,
            0xC1 => MessageType::ErrorAck,
            _ => MessageType::Unknown,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value.as_u8()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Request => write!(f, "REQUEST"),
            MessageType::RequestNoReturn => write!(f, "REQUEST_NO_RETURN"),
            MessageType::Notification => write!(f, "NOTIFICATION"),
            MessageType::RequestAck => write!(f, "REQUEST_ACK"),
            MessageType::RequestNoReturnAck => write!(f, "REQUEST_NO_RETURN_ACK"),
            MessageType::NotificationAck => write!(f, "NOTIFICATION_ACK"),
            MessageType::Response => write!(f, "RESPONSE"),
            MessageType::Error => write!(f, "ERROR"),
            MessageType::ResponseAck => write!(f, "RESPONSE_ACK"),
            MessageType::ErrorAck => write!(f, "ERROR_ACK"),
            MessageType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
