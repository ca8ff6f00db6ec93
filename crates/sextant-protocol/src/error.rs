//! Error types for encoding, decoding and framing protocol messages.

use thiserror::Error;

/// Errors that can occur while moving messages across the wire.
#[derive(Debug, Error)]
pub enum Error {
    /// A request could not be encoded because the caller supplied malformed input.
    #[error("cannot encode {request}: {reason}")]
    Encode {
        /// The request kind that failed to encode.
        request: &'static str,
        /// What was wrong with the input.
        reason: String,
    },

    /// Failed to serialize an outbound envelope.
    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    /// An inbound frame body was not a valid message.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// An inbound message was valid JSON but had the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A reply carried a call id but its payload could not be decoded.
    #[error("malformed reply to call {call_id}: {reason}")]
    BadReply {
        /// Correlation id taken from the envelope.
        call_id: u64,
        /// What was wrong with the payload.
        reason: String,
    },

    /// Invalid or missing Content-Length header. The stream cannot be resynchronised.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame")]
    Truncated,

    /// I/O error on the underlying channel.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an encode error for a request kind.
    #[must_use]
    pub fn encode(request: &'static str, reason: impl Into<String>) -> Self {
        Self::Encode {
            request,
            reason: reason.into(),
        }
    }

    /// Call id of the reply this error belongs to, when the envelope had one.
    #[must_use]
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Self::BadReply { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }

    /// Whether the byte stream is unusable after this error.
    ///
    /// Body-level decode failures leave the framing intact, so the next frame
    /// can still be read. Header, truncation and I/O failures cannot recover.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader(_) | Self::Truncated | Self::Io(_)
        )
    }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_io_errors_are_fatal() {
        assert!(Error::InvalidHeader("x".to_string()).is_fatal());
        assert!(Error::Truncated.is_fatal());
        assert!(Error::Io(std::io::Error::other("boom")).is_fatal());
    }

    #[test]
    fn body_errors_are_recoverable() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!Error::Decode(json_err).is_fatal());
        assert!(!Error::Malformed("no payload".to_string()).is_fatal());
        assert!(!Error::encode("RenameRefactor", "empty name").is_fatal());
        let bad_reply = Error::BadReply {
            call_id: 3,
            reason: "no typehint".to_string(),
        };
        assert!(!bad_reply.is_fatal());
        assert_eq!(bad_reply.call_id(), Some(3));
        assert_eq!(Error::Malformed("x".to_string()).call_id(), None);
    }

    #[test]
    fn encode_error_names_request() {
        let err = Error::encode("PublicSymbolSearch", "no keywords");
        assert_eq!(
            err.to_string(),
            "cannot encode PublicSymbolSearch: no keywords"
        );
    }
}
