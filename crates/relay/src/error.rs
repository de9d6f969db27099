// Protocol error vocabulary for client-facing WebSocket frames.

use bellhop_common::protocol::ws::WsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidMessage,
    JoinMissingId,
    UnsupportedMessage,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::JoinMissingId => "JOIN_MISSING_ID",
            Self::UnsupportedMessage => "UNSUPPORTED_MESSAGE",
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid websocket frame payload",
            Self::JoinMissingId => "join request is missing a required identifier",
            Self::UnsupportedMessage => "message type is not accepted from clients",
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::UnsupportedMessage)
    }

    /// Build the error frame sent back to the offending connection.
    pub fn frame(self) -> WsMessage {
        WsMessage::Error {
            code: self.as_str().to_string(),
            message: self.default_message().to_string(),
            retryable: self.retryable(),
        }
    }

    pub fn frame_with_message(self, message: impl Into<String>) -> WsMessage {
        WsMessage::Error {
            code: self.as_str().to_string(),
            message: message.into(),
            retryable: self.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_carries_code_and_default_message() {
        let WsMessage::Error { code, message, retryable } = ErrorCode::JoinMissingId.frame() else {
            panic!("expected an error frame");
        };
        assert_eq!(code, "JOIN_MISSING_ID");
        assert_eq!(message, "join request is missing a required identifier");
        assert!(!retryable);
    }

    #[test]
    fn unsupported_message_is_retryable() {
        assert!(ErrorCode::UnsupportedMessage.retryable());
        assert!(!ErrorCode::InvalidMessage.retryable());
    }
}
