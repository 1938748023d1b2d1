use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Status code reported by a [`MemoryCipher`](crate::cipher::MemoryCipher)
/// when it fails to transform a region.
///
/// On Windows this is the `GetLastError` value left by `CryptProtectMemory`
/// or `CryptUnprotectMemory`; on Unix it is an `errno`-style code.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
#[error("memory cipher returned status {0:#x}")]
pub struct CipherStatus(pub i32);

/// Errors raised by [`SecureString`](crate::SecureString) and the buffers
/// underneath it.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// The platform has no usable in-process memory encryption.
    #[error("in-process memory encryption is not supported on this platform")]
    NotSupported,

    /// A protected or foreign allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Initial contents longer than [`MAX_LENGTH`](crate::MAX_LENGTH).
    #[error("length {len} exceeds the maximum of {max} code units")]
    InvalidArgument { len: usize, max: usize },

    /// An index or a requested capacity is outside its valid bounds.
    #[error("{what} {value} is out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// Mutation attempted on a read-only instance.
    #[error("secure string is read-only")]
    InvalidOperation,

    /// Any call on a disposed instance.
    #[error("secure string has been disposed")]
    ObjectDisposed,

    /// The memory cipher failed; the operation is not retried.
    #[error("cryptographic failure: {0}")]
    CryptoFailure(#[from] CipherStatus),

    /// The platform wide-to-multibyte conversion failed.
    #[error("ANSI transcoding failed with status {0:#x}")]
    Transcoding(i32),
}

impl Error {
    pub(crate) fn index(value: usize, limit: usize) -> Self {
        Self::OutOfRange {
            what: "index",
            value,
            limit,
        }
    }

    pub(crate) fn capacity(value: usize, limit: usize) -> Self {
        Self::OutOfRange {
            what: "capacity",
            value,
            limit,
        }
    }
}
