//! Page-backed memory for secrets.
//!
//! Regions are mapped straight from the OS rather than the global allocator,
//! pinned in RAM where the process is allowed to (`mlock`/`VirtualLock`),
//! kept out of core dumps where the platform supports it, and zero-filled
//! before they are unmapped.

pub mod ffi;

#[cfg(target_family = "unix")]
mod unix;
#[cfg(target_family = "windows")]
mod windows;

#[cfg(target_family = "unix")]
pub use self::unix::UnixLockedMemory as PlatformMemory;
#[cfg(target_family = "windows")]
pub use self::windows::WindowsLockedMemory as PlatformMemory;

/// Trait representing an exclusively owned region of secret memory.
///
/// Implementors must hand out zero-initialized memory and must zero-fill it
/// again before it goes back to the OS, on every release path.
pub trait LockedMemory: AsRef<[u8]> + AsMut<[u8]> + Sized {
    /// Allocates a new region of exactly `len` usable bytes.
    ///
    /// # Returns
    /// The region if successful, or the `io::Error` reported by the OS.
    fn with_length(len: usize) -> std::io::Result<Self>;

    /// Whether the region is pinned against swapping.
    ///
    /// Pinning is best-effort: a process over its lock limit still gets
    /// a usable region.
    fn is_locked(&self) -> bool;
}

#[inline]
fn check_length(len: usize) -> std::io::Result<()> {
    if len > 0 && len <= isize::MAX as usize {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "length out of bounds",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_zeroed_and_writable() {
        let mut memory = PlatformMemory::with_length(100).expect("Failed to allocate memory");
        assert_eq!(memory.as_ref().len(), 100);
        assert!(memory.as_ref().iter().all(|&b| b == 0));

        memory.as_mut()[99] = 42;
        assert_eq!(memory.as_ref()[99], 42);
    }

    #[test]
    fn test_region_spanning_pages() {
        let len = ffi::page_size() * 2 + 1;
        let mut memory = PlatformMemory::with_length(len).expect("Failed to allocate memory");
        memory.as_mut()[len - 1] = 7;
        assert_eq!(memory.as_ref()[len - 1], 7);
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = PlatformMemory::with_length(0).err().expect("zero length must fail");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_page_aligned() {
        let page = ffi::page_size();
        assert_eq!(ffi::page_aligned(1), page);
        assert_eq!(ffi::page_aligned(page), page);
        assert_eq!(ffi::page_aligned(page + 1), page * 2);
    }
}
