use core::{
    mem::MaybeUninit,
    ptr::{self, NonNull},
};
use std::io;

use windows_sys::Win32::System::{Memory as win, SystemInformation as win_info};

/// Reserves and commits a read-write, uncached region of `len` bytes.
///
/// Wraps the `VirtualAlloc` system call. Committed pages start zeroed.
pub fn virtual_alloc(len: usize) -> io::Result<NonNull<[u8]>> {
    let flags = win::MEM_COMMIT | win::MEM_RESERVE;
    let prot = win::PAGE_READWRITE | win::PAGE_NOCACHE;

    match unsafe { win::VirtualAlloc(ptr::null(), len, flags, prot) } {
        ptr if ptr.is_null() => Err(io::Error::last_os_error()),
        ptr => {
            let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
            Ok(NonNull::slice_from_raw_parts(ptr, len))
        }
    }
}

/// Pins a committed region in the working set so it is never paged out.
///
/// Wraps the `VirtualLock` system call.
pub fn virtual_lock(region: NonNull<[u8]>) -> io::Result<()> {
    match unsafe { win::VirtualLock(region.as_ptr() as *const _, region.len()) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Undoes [`virtual_lock`].
///
/// Wraps the `VirtualUnlock` system call.
pub fn virtual_unlock(region: NonNull<[u8]>) -> io::Result<()> {
    match unsafe { win::VirtualUnlock(region.as_ptr() as *const _, region.len()) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Releases a whole reservation created by [`virtual_alloc`].
///
/// Wraps the `VirtualFree` system call with `MEM_RELEASE`.
///
/// # Safety
///
/// `region` must be a live reservation and must not be touched afterwards.
pub unsafe fn virtual_free(region: NonNull<[u8]>) -> io::Result<()> {
    match win::VirtualFree(region.as_ptr() as *mut _, 0, win::MEM_RELEASE) {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Wraps `GetSystemInfo` and reads `dwPageSize`.
#[inline]
pub(super) fn page_size() -> usize {
    let sys_info = {
        let mut sys_info = MaybeUninit::<win_info::SYSTEM_INFO>::uninit();
        unsafe {
            win_info::GetSystemInfo(sys_info.as_mut_ptr());
            sys_info.assume_init()
        }
    };

    sys_info.dwPageSize as usize
}
