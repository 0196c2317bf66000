//! Error types for image operations.

use std::fmt;
use std::io;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors that can occur while operating on a vault image.
#[derive(Debug)]
pub enum VaultError {
    /// I/O error reading or writing the host image file.
    Io(io::Error),

    /// The allocator scanned the whole volume bitmap without finding a free
    /// block. The file layer reports this as a short write.
    NoFreeBlocks,

    /// A block index or byte offset points outside the image.
    OutOfBounds { requested: u64, limit: u64 },

    /// An argument was rejected (for example, writing to a read-only file).
    InvalidArgument { reason: String },

    /// The image contents violate the on-disk format: magic or version
    /// mismatch (which also covers a wrong password), a payload length
    /// exceeding block capacity, or a chain cycle that is not a terminal
    /// self-loop.
    CorruptImage { reason: String },

    /// Operation on a stream that is closed or has a sticky failed position.
    StreamClosed,
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::Io(e) => write!(f, "I/O error: {}", e),
            VaultError::NoFreeBlocks => write!(f, "no free blocks left in volume"),
            VaultError::OutOfBounds { requested, limit } => {
                write!(f, "index {} is out of bounds (limit: {})", requested, limit)
            }
            VaultError::InvalidArgument { reason } => {
                write!(f, "invalid argument: {}", reason)
            }
            VaultError::CorruptImage { reason } => {
                write!(f, "corrupt image: {}", reason)
            }
            VaultError::StreamClosed => write!(f, "image stream is closed or failed"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for VaultError {
    fn from(err: io::Error) -> Self {
        VaultError::Io(err)
    }
}
