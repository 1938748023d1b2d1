use core::ptr::{self, NonNull};
use std::io;

use log::{error, warn};
use zeroize::Zeroize;

use super::{check_length, ffi, LockedMemory};

/// Locked memory for Windows systems.
///
/// The region is committed with `VirtualAlloc` and pinned with `VirtualLock`
/// when the working-set quota allows it.
pub struct WindowsLockedMemory {
    virt_alloc: NonNull<[u8]>,
    len: usize,
    locked: bool,
}

// The reservation is owned exclusively by this value.
unsafe impl Send for WindowsLockedMemory {}
unsafe impl Sync for WindowsLockedMemory {}

impl LockedMemory for WindowsLockedMemory {
    fn with_length(len: usize) -> io::Result<Self> {
        check_length(len)?;

        let virt_alloc = ffi::windows::virtual_alloc(ffi::page_aligned(len))?;

        let locked = match ffi::windows::virtual_lock(virt_alloc) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "VirtualLock of {} bytes failed, region may be paged out: {err}",
                    virt_alloc.len()
                );
                false
            }
        };

        Ok(Self {
            virt_alloc,
            len,
            locked,
        })
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

impl AsRef<[u8]> for WindowsLockedMemory {
    fn as_ref(&self) -> &[u8] {
        let slice_ptr = ptr::slice_from_raw_parts(self.virt_alloc.as_ptr() as *const u8, self.len);
        unsafe { &*slice_ptr }
    }
}

impl AsMut<[u8]> for WindowsLockedMemory {
    fn as_mut(&mut self) -> &mut [u8] {
        let slice_ptr =
            ptr::slice_from_raw_parts_mut(self.virt_alloc.as_ptr() as *mut u8, self.len);
        unsafe { &mut *slice_ptr }
    }
}

impl Drop for WindowsLockedMemory {
    fn drop(&mut self) {
        Zeroize::zeroize(unsafe { &mut *self.virt_alloc.as_ptr() });

        if self.locked {
            let _ = ffi::windows::virtual_unlock(self.virt_alloc);
        }

        if let Err(err) = unsafe { ffi::windows::virtual_free(self.virt_alloc) } {
            error!("VirtualFree of {} bytes failed: {err}", self.virt_alloc.len());
        }
    }
}
