use core::{mem, ptr::NonNull};

use super::ForeignKind;
use crate::error::Result;

/// Bytes of the `BSTR` length prefix.
const BSTR_PREFIX: usize = mem::size_of::<u32>();

/// Allocates `size` bytes on the C heap. For `BSTR`s the byte length of the
/// string data is stored in a prefix and the returned pointer skips it.
pub(super) fn alloc(kind: ForeignKind, size: usize) -> Option<NonNull<u8>> {
    match kind {
        ForeignKind::Wide(_) | ForeignKind::Ansi(_) => {
            NonNull::new(unsafe { libc::malloc(size) } as *mut u8)
        }
        ForeignKind::Bstr => {
            let data_len = u32::try_from(size - kind.terminator_len()).ok()?;
            let base = NonNull::new(unsafe { libc::malloc(size.checked_add(BSTR_PREFIX)?) } as *mut u8)?;
            unsafe {
                (base.as_ptr() as *mut u32).write(data_len);
                Some(NonNull::new_unchecked(base.as_ptr().add(BSTR_PREFIX)))
            }
        }
    }
}

/// Frees an allocation made by [`alloc`] for the same `kind`.
///
/// # Safety
/// `ptr` must come from [`alloc`] with the same `kind` and not be freed yet.
pub(super) unsafe fn free(kind: ForeignKind, ptr: NonNull<u8>) {
    match kind {
        ForeignKind::Wide(_) | ForeignKind::Ansi(_) => libc::free(ptr.as_ptr() as *mut _),
        ForeignKind::Bstr => {
            let base = ptr.as_ptr().sub(BSTR_PREFIX);
            (base as *mut u32).write_volatile(0);
            libc::free(base as *mut _);
        }
    }
}

/// Reads the byte length stored in a `BSTR` prefix.
///
/// # Safety
/// `ptr` must come from [`alloc`] with [`ForeignKind::Bstr`].
pub(super) unsafe fn bstr_byte_len(ptr: NonNull<u8>) -> usize {
    (ptr.as_ptr().sub(BSTR_PREFIX) as *const u32).read() as usize
}

// The process code page is UTF-8. Unpaired surrogates have no mapping.
const UNMAPPABLE: char = '?';

/// Bytes needed to transcode `units`, excluding the terminator.
pub(super) fn ansi_len(units: &[u16]) -> Result<usize> {
    Ok(char::decode_utf16(units.iter().copied())
        .map(|c| c.map_or(UNMAPPABLE.len_utf8(), char::len_utf8))
        .sum())
}

/// Transcodes `units` straight into `out`, which is exactly
/// [`ansi_len`] bytes long.
pub(super) fn encode_ansi(units: &[u16], out: &mut [u8]) -> Result<()> {
    let mut at = 0;
    for c in char::decode_utf16(units.iter().copied()) {
        at += c.unwrap_or(UNMAPPABLE).encode_utf8(&mut out[at..]).len();
    }
    debug_assert_eq!(at, out.len());
    Ok(())
}
