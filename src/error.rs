//! Error types for ziptide

use std::io;

/// Result type for ziptide operations
pub type Result<T> = std::result::Result<T, ZipStreamError>;

/// Error types that can occur while encoding an archive.
///
/// Every error is terminal: the block sequence ends, and any bytes already
/// delivered are a truncated prefix of what would have been a valid archive
/// and must be discarded.
#[derive(Debug)]
pub enum ZipStreamError {
    /// A member's uncompressed byte count exceeded the bound of its method
    /// (2^32-1 for 32-bit methods, 2^64-1 for 64-bit methods)
    UncompressedSizeOverflow,
    /// A member's compressed byte count exceeded the bound of its method
    CompressedSizeOverflow,
    /// The archive offset exceeded the bound of the current method or of
    /// the end-of-central-directory record
    OffsetOverflow,
    /// The central directory grew past its 32-bit (or 64-bit) size bound
    CentralDirectorySizeOverflow,
    /// More central directory entries than the end record can describe
    CentralDirectoryNumberOfEntriesOverflow,
    /// A member name longer than 2^16-1 bytes of UTF-8
    NameLengthOverflow,
    /// Streamed-store content whose CRC-32 did not match the declared value
    Crc32Integrity,
    /// Streamed-store content whose length did not match the declared value
    UncompressedSizeIntegrity,
    /// Failure raised by a member's content iterator, surfaced unchanged
    Io(io::Error),
    /// Encryption setup error
    #[cfg(feature = "encryption")]
    EncryptionError(String),
}

impl std::fmt::Display for ZipStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipStreamError::UncompressedSizeOverflow => {
                write!(f, "uncompressed size exceeds the bound of the member's method")
            }
            ZipStreamError::CompressedSizeOverflow => {
                write!(f, "compressed size exceeds the bound of the member's method")
            }
            ZipStreamError::OffsetOverflow => {
                write!(f, "archive offset exceeds the bound of the member's method")
            }
            ZipStreamError::CentralDirectorySizeOverflow => {
                write!(f, "central directory size exceeds its bound")
            }
            ZipStreamError::CentralDirectoryNumberOfEntriesOverflow => {
                write!(f, "too many central directory entries for the end record")
            }
            ZipStreamError::NameLengthOverflow => {
                write!(f, "member name longer than 65535 bytes")
            }
            ZipStreamError::Crc32Integrity => {
                write!(f, "streamed content CRC-32 does not match the declared value")
            }
            ZipStreamError::UncompressedSizeIntegrity => {
                write!(f, "streamed content size does not match the declared value")
            }
            ZipStreamError::Io(e) => write!(f, "content error: {}", e),
            #[cfg(feature = "encryption")]
            ZipStreamError::EncryptionError(msg) => write!(f, "encryption error: {}", msg),
        }
    }
}

impl std::error::Error for ZipStreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ZipStreamError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ZipStreamError {
    fn from(err: io::Error) -> Self {
        ZipStreamError::Io(err)
    }
}
