use core::{
    ffi::c_void,
    ptr::{self, NonNull},
};
use std::io;

use windows_sys::Win32::{
    Foundation::{LocalFree, SysAllocStringLen, SysFreeString, SysStringByteLen},
    Globalization::{GetACP, WideCharToMultiByte, CP_ACP, CP_UTF8, WC_NO_BEST_FIT_CHARS},
    System::{
        Com::{CoTaskMemAlloc, CoTaskMemFree},
        Memory::{LocalAlloc, LMEM_FIXED},
    },
};

use super::{ForeignHeap, ForeignKind};
use crate::error::{Error, Result};

const DEFAULT_CHAR: &[u8; 2] = b"?\0";

/// Allocates `size` bytes with the allocator `kind` names. `BSTR`s come
/// from `SysAllocStringLen`, which writes the length prefix itself.
pub(super) fn alloc(kind: ForeignKind, size: usize) -> Option<NonNull<u8>> {
    let ptr = match kind {
        ForeignKind::Wide(heap) | ForeignKind::Ansi(heap) => match heap {
            ForeignHeap::Global => unsafe { LocalAlloc(LMEM_FIXED, size) as *mut u8 },
            ForeignHeap::CoTaskMem => unsafe { CoTaskMemAlloc(size) as *mut u8 },
        },
        ForeignKind::Bstr => {
            let units = u32::try_from((size - kind.terminator_len()) / 2).ok()?;
            unsafe { SysAllocStringLen(ptr::null(), units) as *mut u8 }
        }
    };
    NonNull::new(ptr)
}

/// Frees an allocation made by [`alloc`] for the same `kind`.
///
/// # Safety
/// `ptr` must come from [`alloc`] with the same `kind` and not be freed yet.
pub(super) unsafe fn free(kind: ForeignKind, ptr: NonNull<u8>) {
    match kind {
        ForeignKind::Wide(heap) | ForeignKind::Ansi(heap) => match heap {
            ForeignHeap::Global => {
                LocalFree(ptr.as_ptr() as *mut c_void);
            }
            ForeignHeap::CoTaskMem => CoTaskMemFree(ptr.as_ptr() as *const c_void),
        },
        ForeignKind::Bstr => SysFreeString(ptr.as_ptr() as *const u16),
    }
}

/// # Safety
/// `ptr` must be a live `BSTR`.
pub(super) unsafe fn bstr_byte_len(ptr: NonNull<u8>) -> usize {
    SysStringByteLen(ptr.as_ptr() as *const u16) as usize
}

fn transcoding_error() -> Error {
    Error::Transcoding(io::Error::last_os_error().raw_os_error().unwrap_or(-1))
}

/// Flags and default character for converting into `code_page`.
/// `WideCharToMultiByte` rejects both for UTF-8.
fn conversion_options(code_page: u32) -> (u32, *const u8) {
    match code_page {
        CP_UTF8 => (0, ptr::null()),
        _ => (WC_NO_BEST_FIT_CHARS, DEFAULT_CHAR.as_ptr()),
    }
}

fn wide_len(units: &[u16]) -> Result<i32> {
    i32::try_from(units.len()).map_err(|_| Error::index(units.len(), i32::MAX as usize))
}

/// Bytes needed to transcode `units` into the ANSI code page without
/// best-fit mappings, excluding the terminator.
pub(super) fn ansi_len(units: &[u16]) -> Result<usize> {
    if units.is_empty() {
        return Ok(0);
    }

    let (flags, default_char) = conversion_options(unsafe { GetACP() });
    match unsafe {
        WideCharToMultiByte(
            CP_ACP,
            flags,
            units.as_ptr(),
            wide_len(units)?,
            ptr::null_mut(),
            0,
            default_char,
            ptr::null_mut(),
        )
    } {
        0 => Err(transcoding_error()),
        len => Ok(len as usize),
    }
}

/// Transcodes `units` straight into `out`, which is exactly
/// [`ansi_len`] bytes long.
pub(super) fn encode_ansi(units: &[u16], out: &mut [u8]) -> Result<()> {
    if units.is_empty() {
        return Ok(());
    }

    let out_len = i32::try_from(out.len()).map_err(|_| Error::OutOfMemory)?;
    let (flags, default_char) = conversion_options(unsafe { GetACP() });
    match unsafe {
        WideCharToMultiByte(
            CP_ACP,
            flags,
            units.as_ptr(),
            wide_len(units)?,
            out.as_mut_ptr(),
            out_len,
            default_char,
            ptr::null_mut(),
        )
    } {
        0 => Err(transcoding_error()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_code_page_drops_best_fit_options() {
        let (flags, default_char) = conversion_options(CP_UTF8);
        assert_eq!(flags, 0);
        assert!(default_char.is_null());

        let (flags, default_char) = conversion_options(1252);
        assert_eq!(flags, WC_NO_BEST_FIT_CHARS);
        assert_eq!(default_char, DEFAULT_CHAR.as_ptr());
    }

    #[test]
    fn test_ansi_round_trip_in_current_code_page() {
        let units: Vec<u16> = "key-123".encode_utf16().collect();
        let len = ansi_len(&units).expect("Failed to measure");
        let mut out = vec![0u8; len];
        encode_ansi(&units, &mut out).expect("Failed to encode");
        assert_eq!(out, b"key-123");
    }
}
