use std::error::Error;
use std::fmt;

/// Result alias used throughout the wire codec, mirroring the rest of the
/// crate's `Box<dyn Error>` error style.
pub type CResult<T> = std::result::Result<T, Box<dyn Error>>;

/// Errors the wire codec can raise while parsing or building a message.
///
/// The engine core never produces one of these: it only ever consumes an
/// already-parsed [`crate::wire::Message`], so a `WireError` can only reach a
/// caller from [`crate::wire::Message::from_buffer`] or from a
/// [`crate::wire::MessageBuilder`] write that overruns its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Read or write went past the end of the buffer.
    BufferOverrun,
    /// A domain name label exceeded 63 bytes.
    LabelTooLong,
    /// A compressed name followed more pointer jumps than allowed.
    TooManyJumps { limit: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::BufferOverrun => write!(f, "end of buffer"),
            WireError::LabelTooLong => write!(f, "single label exceeds 63 bytes"),
            WireError::TooManyJumps { limit } => {
                write!(f, "limit of {} compression jumps exceeded", limit)
            }
        }
    }
}

impl Error for WireError {}
