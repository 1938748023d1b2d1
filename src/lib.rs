//! Mutable secret strings that stay encrypted in RAM between operations.
//!
//! [`SecureString`] holds a credential as UTF-16 code units in page-backed,
//! locked memory and keeps it encrypted with a reversible, same-process
//! [`MemoryCipher`] whenever no operation is running. Contents can be
//! edited one unit at a time, sealed, and copied out to caller-owned memory
//! ([`ForeignBuffer`]) for APIs that insist on a plaintext C string.

mod alloc;
mod buffer;
pub mod cipher;
mod error;
mod export;
mod secure_string;

/// Allocation granularity in code units: the 16-byte block of the memory
/// cipher.
pub const BLOCK_SIZE: usize = cipher::BLOCK_BYTES / 2;

/// Longest secret, in code units, a [`SecureString`] accepts.
pub const MAX_LENGTH: usize = 65536;

pub use buffer::{aligned_capacity, ProtectedBuffer};
pub use cipher::MemoryCipher;
pub use error::{CipherStatus, Error, Result};
pub use export::{ExportKind, ForeignBuffer, ForeignHeap, ForeignKind};
pub use secure_string::SecureString;
