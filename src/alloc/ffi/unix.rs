use core::ptr::{self, NonNull};
use std::io;

/// `madvise` hint that keeps a region out of core dumps, where one exists.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const MADV_EXCLUDE_FROM_DUMP: Option<i32> = Some(libc::MADV_DONTDUMP);
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
pub const MADV_EXCLUDE_FROM_DUMP: Option<i32> = Some(libc::MADV_NOCORE);
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
pub const MADV_EXCLUDE_FROM_DUMP: Option<i32> = None;

/// Reverses [`MADV_EXCLUDE_FROM_DUMP`] before a region is handed back.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const MADV_INCLUDE_IN_DUMP: Option<i32> = Some(libc::MADV_DODUMP);
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
pub const MADV_INCLUDE_IN_DUMP: Option<i32> = Some(libc::MADV_CORE);
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
pub const MADV_INCLUDE_IN_DUMP: Option<i32> = None;

/// Maps a private, anonymous, read-write region of `len` bytes.
///
/// Wraps the `mmap` system call. The kernel hands back zero-filled pages.
///
/// # Returns
///
/// * The mapped region, or the OS error that prevented the mapping.
pub fn mmap_anonymous(len: usize) -> io::Result<NonNull<[u8]>> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

    match unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) } {
        libc::MAP_FAILED => Err(io::Error::last_os_error()),
        ptr => {
            let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
            Ok(NonNull::slice_from_raw_parts(ptr, len))
        }
    }
}

/// Pins a mapped region in RAM so it is never written to swap.
///
/// Wraps the `mlock` system call.
pub fn mlock(region: NonNull<[u8]>) -> io::Result<()> {
    match unsafe { libc::mlock(region.as_ptr() as *const _, region.len()) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Undoes [`mlock`].
///
/// Wraps the `munlock` system call.
pub fn munlock(region: NonNull<[u8]>) -> io::Result<()> {
    match unsafe { libc::munlock(region.as_ptr() as *const _, region.len()) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Gives the kernel a usage hint about a mapped region.
///
/// Wraps the `madvise` system call.
pub fn madvise(region: NonNull<[u8]>, advice: i32) -> io::Result<()> {
    match unsafe { libc::madvise(region.as_ptr() as *mut _, region.len(), advice) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Removes a mapping created by [`mmap_anonymous`].
///
/// Wraps the `munmap` system call.
///
/// # Safety
///
/// `region` must be exactly a live mapping and must not be touched afterwards.
pub unsafe fn munmap(region: NonNull<[u8]>) -> io::Result<()> {
    match libc::munmap(region.as_ptr() as *mut _, region.len()) {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Wraps `sysconf(_SC_PAGESIZE)`, or `vm_page_size` on macOS.
#[inline]
pub(super) fn page_size() -> usize {
    #[cfg(target_os = "macos")]
    unsafe {
        libc::vm_page_size as usize
    }
    #[cfg(not(target_os = "macos"))]
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
}
