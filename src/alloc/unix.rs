use core::ptr::{self, NonNull};
use std::io;

use log::{error, warn};
use zeroize::Zeroize;

use super::{check_length, ffi, LockedMemory};

// FIXME Every region occupies at least one full page.
/// Locked memory for Unix-based systems.
///
/// The region is an anonymous private mapping, `mlock`ed when the process
/// limit allows it and advised out of core dumps where the kernel knows how.
pub struct UnixLockedMemory {
    mapping: NonNull<[u8]>,
    len: usize,
    locked: bool,
    dump_excluded: bool,
}

// The mapping is owned exclusively by this value.
unsafe impl Send for UnixLockedMemory {}
unsafe impl Sync for UnixLockedMemory {}

impl LockedMemory for UnixLockedMemory {
    fn with_length(len: usize) -> io::Result<Self> {
        check_length(len)?;

        let mapping = ffi::unix::mmap_anonymous(ffi::page_aligned(len))?;

        let locked = match ffi::unix::mlock(mapping) {
            Ok(()) => true,
            Err(err) => {
                warn!("mlock of {} bytes failed, region may be swapped: {err}", mapping.len());
                false
            }
        };

        let dump_excluded = match ffi::unix::MADV_EXCLUDE_FROM_DUMP {
            Some(advice) => match ffi::unix::madvise(mapping, advice) {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        "madvise of {} bytes failed, region may appear in core dumps: {err}",
                        mapping.len()
                    );
                    false
                }
            },
            None => false,
        };

        Ok(Self {
            mapping,
            len,
            locked,
            dump_excluded,
        })
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

impl UnixLockedMemory {
    /// Whether the kernel accepted the hint to leave this region out of
    /// core dumps.
    #[inline]
    pub fn is_dump_excluded(&self) -> bool {
        self.dump_excluded
    }
}

impl AsRef<[u8]> for UnixLockedMemory {
    fn as_ref(&self) -> &[u8] {
        let slice_ptr = ptr::slice_from_raw_parts(self.mapping.as_ptr() as *const u8, self.len);
        unsafe { &*slice_ptr }
    }
}

impl AsMut<[u8]> for UnixLockedMemory {
    fn as_mut(&mut self) -> &mut [u8] {
        let slice_ptr = ptr::slice_from_raw_parts_mut(self.mapping.as_ptr() as *mut u8, self.len);
        unsafe { &mut *slice_ptr }
    }
}

impl Drop for UnixLockedMemory {
    fn drop(&mut self) {
        // Wipe the whole mapping, including the page tail past `len`.
        Zeroize::zeroize(unsafe { &mut *self.mapping.as_ptr() });

        // May fail (unchecked)
        if let (true, Some(advice)) = (self.is_dump_excluded(), ffi::unix::MADV_INCLUDE_IN_DUMP) {
            let _ = ffi::unix::madvise(self.mapping, advice);
        }
        if self.locked {
            let _ = ffi::unix::munlock(self.mapping);
        }

        if let Err(err) = unsafe { ffi::unix::munmap(self.mapping) } {
            error!("munmap of {} bytes failed: {err}", self.mapping.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_region_is_excluded_from_dumps() {
        let memory = UnixLockedMemory::with_length(64).expect("Failed to allocate");
        assert!(memory.is_dump_excluded());
    }
}
