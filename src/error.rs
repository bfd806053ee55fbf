//! Transport and protocol error types.

use std::io;

/// How a failed operation should be handled by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The channel cannot be recovered: tear it down and mark the client dead.
    TransportFatal,
    /// The offending message is skipped (or answered with a status message);
    /// the channel survives.
    Recoverable,
    /// A resource limit would be exceeded: defer and retry on the next loop
    /// iteration. Never reported to the user.
    Backpressure,
}

/// Errors raised by the buffer, channel and frame layers.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A dynamic buffer would grow past its configured maximum.
    #[error("buffer range exceeded: need {needed} bytes, max {max}")]
    Range {
        /// Total bytes the operation needs.
        needed: usize,
        /// Configured growth cap.
        max: usize,
    },

    /// A read or skip asked for more bytes than the buffer holds.
    #[error("buffer size mismatch: requested {requested}, available {available}")]
    SizeMismatch {
        /// Bytes requested.
        requested: usize,
        /// Unread bytes available.
        available: usize,
    },

    /// A frame header declared a length below the header size.
    #[error("frame length {0} below header size")]
    FrameTooShort(u16),

    /// A frame header declared a length above the fixed maximum.
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared total length.
        length: usize,
        /// Fixed frame size cap.
        max: usize,
    },

    /// A message type id not known to this build.
    #[error("unknown message type {0}")]
    UnknownType(u32),

    /// A payload that does not match its declared layout.
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    /// The operation would block; retry when the endpoint is ready again.
    #[error("operation would block")]
    WouldBlock,

    /// The inbound descriptor slot is occupied; reading is refused until the
    /// pending descriptor is claimed.
    #[error("inbound descriptor slot occupied")]
    DescriptorRefused,

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Any other I/O failure on the channel.
    #[error("channel i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Classify this error for the event loop.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::FrameTooShort(_)
            | Self::FrameTooLarge { .. }
            | Self::MalformedPayload(_)
            | Self::PeerClosed
            | Self::Io(_) => Severity::TransportFatal,
            Self::UnknownType(_) | Self::Range { .. } | Self::SizeMismatch { .. } => {
                Severity::Recoverable
            }
            Self::WouldBlock | Self::DescriptorRefused => Severity::Backpressure,
        }
    }

    /// True when the event loop should retry this operation later.
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        matches!(self.severity(), Severity::Backpressure)
    }
}
