use core::fmt;

use log::error;
use zeroize::Zeroize;

use crate::alloc::{LockedMemory, PlatformMemory};
use crate::error::{Error, Result};
use crate::BLOCK_SIZE;

/// Rounds a requested capacity, in code units, to the block size the memory
/// cipher works on. Zero becomes one full block; exact multiples are kept.
#[inline]
pub const fn aligned_capacity(requested: usize) -> usize {
    let aligned = (requested / BLOCK_SIZE) * BLOCK_SIZE;
    if requested == 0 || requested % BLOCK_SIZE != 0 {
        aligned + BLOCK_SIZE
    } else {
        aligned
    }
}

/// Fixed-capacity storage of 2-byte code units in locked memory.
///
/// A `ProtectedBuffer` knows nothing about encryption or logical length: it
/// is opaque, block-aligned storage that is zero-filled when allocated and
/// zero-filled again before it is released. Contents are only reachable
/// through scoped closures, so no reference outlives the call.
pub struct ProtectedBuffer {
    memory: PlatformMemory,
    capacity: usize,
}

impl ProtectedBuffer {
    /// Allocates zeroed storage for exactly `capacity_units` code units.
    ///
    /// `capacity_units` must be a positive multiple of [`BLOCK_SIZE`].
    ///
    /// # Errors
    /// [`Error::OutOfMemory`] when the OS refuses the allocation.
    pub fn allocate(capacity_units: usize) -> Result<Self> {
        debug_assert!(capacity_units > 0 && capacity_units % BLOCK_SIZE == 0);

        let bytes = capacity_units
            .checked_mul(2)
            .ok_or(Error::OutOfMemory)?;

        let memory = PlatformMemory::with_length(bytes).map_err(|err| {
            error!("allocation of {bytes} protected bytes failed: {err}");
            Error::OutOfMemory
        })?;

        Ok(Self {
            memory,
            capacity: capacity_units,
        })
    }

    /// Allocates a buffer large enough for `requested` code units, rounded
    /// with [`aligned_capacity`].
    pub fn allocate_for(requested: usize) -> Result<Self> {
        Self::allocate(aligned_capacity(requested))
    }

    /// Allocated size in code units. Always a positive multiple of
    /// [`BLOCK_SIZE`].
    #[inline]
    pub fn capacity_units(&self) -> usize {
        self.capacity
    }

    /// Whether the backing pages are pinned against swapping.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.memory.is_locked()
    }

    /// Runs `f` over the raw bytes of the whole buffer.
    pub fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.memory.as_mut())
    }

    /// Runs `f` over the whole buffer viewed as code units.
    pub fn with_units_mut<R>(&mut self, f: impl FnOnce(&mut [u16]) -> R) -> R {
        // Page-aligned memory: the unit view has no prefix or suffix.
        let (head, units, tail) = unsafe { self.memory.as_mut().align_to_mut::<u16>() };
        debug_assert!(head.is_empty() && tail.is_empty());
        f(units)
    }

    /// Runs `f` over the whole buffer viewed as code units, read-only.
    pub fn with_units<R>(&self, f: impl FnOnce(&[u16]) -> R) -> R {
        let (head, units, tail) = unsafe { self.memory.as_ref().align_to::<u16>() };
        debug_assert!(head.is_empty() && tail.is_empty());
        f(units)
    }

    /// Zero-fills the whole buffer.
    pub fn clear(&mut self) {
        Zeroize::zeroize(self.memory.as_mut());
    }

    /// Copies every byte of `self` into the front of `dest`.
    ///
    /// # Panics
    /// If `dest` is smaller than `self`. Callers always size `dest` first.
    pub fn copy_into(&self, dest: &mut ProtectedBuffer) {
        assert!(
            dest.capacity >= self.capacity,
            "copy into a smaller protected buffer ({} < {})",
            dest.capacity,
            self.capacity
        );

        let src = self.memory.as_ref();
        dest.memory.as_mut()[..src.len()].copy_from_slice(src);
    }

    /// Zero-fills the buffer and returns it to the OS.
    ///
    /// Dropping a `ProtectedBuffer` does the same; this spells it out at
    /// call sites that replace or dispose of a buffer.
    pub fn zero_and_release(mut self) {
        self.clear();
    }
}

impl fmt::Debug for ProtectedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedBuffer")
            .field("capacity_units", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_capacity() {
        assert_eq!(aligned_capacity(0), BLOCK_SIZE);
        assert_eq!(aligned_capacity(1), BLOCK_SIZE);
        assert_eq!(aligned_capacity(BLOCK_SIZE - 1), BLOCK_SIZE);
        assert_eq!(aligned_capacity(BLOCK_SIZE), BLOCK_SIZE);
        assert_eq!(aligned_capacity(BLOCK_SIZE + 1), BLOCK_SIZE * 2);
        assert_eq!(aligned_capacity(crate::MAX_LENGTH), crate::MAX_LENGTH);
    }

    #[test]
    fn test_allocate_for_is_block_multiple() {
        for requested in [0, 1, 7, 8, 9, 100, 4096, crate::MAX_LENGTH] {
            let buffer = ProtectedBuffer::allocate_for(requested).expect("Failed to allocate");
            let capacity = buffer.capacity_units();
            assert!(capacity > 0);
            assert_eq!(capacity % BLOCK_SIZE, 0);
            assert!(capacity >= requested);
        }
    }

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buffer = ProtectedBuffer::allocate_for(20).expect("Failed to allocate");
        buffer.with_units(|units| {
            assert_eq!(units.len(), 24);
            assert!(units.iter().all(|&u| u == 0));
        });
    }

    #[test]
    fn test_units_and_bytes_share_storage() {
        let mut buffer = ProtectedBuffer::allocate_for(1).expect("Failed to allocate");
        buffer.with_units_mut(|units| units[1] = 0x1234);
        buffer.with_bytes_mut(|bytes| {
            assert_eq!(bytes.len(), BLOCK_SIZE * 2);
            assert_eq!(&bytes[2..4], &0x1234u16.to_ne_bytes());
        });
    }

    #[test]
    fn test_clear_zeroes_everything() {
        let mut buffer = ProtectedBuffer::allocate_for(8).expect("Failed to allocate");
        buffer.with_bytes_mut(|bytes| bytes.fill(0xFF));
        buffer.clear();
        buffer.with_units(|units| assert!(units.iter().all(|&u| u == 0)));
    }

    #[test]
    fn test_copy_into_larger() {
        let mut small = ProtectedBuffer::allocate_for(3).expect("Failed to allocate");
        small.with_units_mut(|units| units[..3].copy_from_slice(&[1, 2, 3]));

        let mut large = ProtectedBuffer::allocate_for(20).expect("Failed to allocate");
        small.copy_into(&mut large);
        large.with_units(|units| {
            assert_eq!(&units[..3], &[1, 2, 3]);
            assert!(units[3..].iter().all(|&u| u == 0));
        });
    }

    #[test]
    #[should_panic(expected = "copy into a smaller protected buffer")]
    fn test_copy_into_smaller_panics() {
        let large = ProtectedBuffer::allocate_for(20).expect("Failed to allocate");
        let mut small = ProtectedBuffer::allocate_for(3).expect("Failed to allocate");
        large.copy_into(&mut small);
    }
}
