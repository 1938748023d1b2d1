//! Plaintext copies of a secret in memory the caller owns.
//!
//! External APIs that want a credential as a C string get a [`ForeignBuffer`]:
//! an ordinary heap allocation holding the plaintext and a terminator. The
//! buffer zero-fills and frees itself on drop; [`ForeignBuffer::into_raw`]
//! hands the allocation over to foreign code instead, and
//! [`ForeignBuffer::from_raw`] takes it back for a zeroing free.

use core::{
    fmt, mem,
    ptr::NonNull,
    slice,
};

use zeroize::Zeroize;

use crate::error::{Error, Result};

#[cfg(target_family = "unix")]
mod unix;
#[cfg(target_family = "windows")]
mod windows;

#[cfg(target_family = "unix")]
use self::unix as sys;
#[cfg(target_family = "windows")]
use self::windows as sys;

/// Encoding of a null-terminated export.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ExportKind {
    /// UTF-16 code units followed by a zero unit.
    Wide,
    /// The process code page followed by a zero byte. Characters with no
    /// exact mapping become `?`.
    Ansi,
}

/// Allocator that owns a null-terminated export.
///
/// On Unix both heaps are the C heap (`malloc`/`free`).
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum ForeignHeap {
    /// `LocalAlloc`/`LocalFree`, the `HGLOBAL` heap.
    #[default]
    Global,
    /// `CoTaskMemAlloc`/`CoTaskMemFree`, the COM task allocator.
    CoTaskMem,
}

/// Layout and allocator of a [`ForeignBuffer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ForeignKind {
    /// Null-terminated UTF-16.
    Wide(ForeignHeap),
    /// Null-terminated bytes in the process code page.
    Ansi(ForeignHeap),
    /// Length-prefixed, null-terminated UTF-16 (`BSTR`). The pointer refers
    /// to the first code unit; the `u32` byte length sits just before it.
    Bstr,
}

impl ForeignKind {
    /// Size of the terminator in bytes.
    #[inline]
    pub const fn terminator_len(self) -> usize {
        match self {
            Self::Ansi(_) => 1,
            Self::Wide(_) | Self::Bstr => 2,
        }
    }

    #[inline]
    const fn is_wide(self) -> bool {
        !matches!(self, Self::Ansi(_))
    }
}

/// A plaintext secret in caller-owned, non-protected memory.
pub struct ForeignBuffer {
    ptr: NonNull<u8>,
    len: usize,
    kind: ForeignKind,
}

// The allocation is owned exclusively by this value.
unsafe impl Send for ForeignBuffer {}
unsafe impl Sync for ForeignBuffer {}

impl ForeignBuffer {
    /// Allocates room for `len` bytes of data plus the terminator, already
    /// terminated at both `0` and `len`.
    fn allocate(kind: ForeignKind, len: usize) -> Result<Self> {
        let size = len
            .checked_add(kind.terminator_len())
            .ok_or(Error::OutOfMemory)?;
        let ptr = sys::alloc(kind, size).ok_or(Error::OutOfMemory)?;

        let mut this = Self { ptr, len, kind };
        this.as_bytes_with_nul_mut().fill(0);
        Ok(this)
    }

    /// Copies `units` into a new wide allocation of `kind`.
    pub(crate) fn wide_from_units(kind: ForeignKind, units: &[u16]) -> Result<Self> {
        debug_assert!(kind.is_wide());

        let mut this = Self::allocate(kind, mem::size_of_val(units))?;
        let data = this.as_bytes_with_nul_mut();
        for (dst, unit) in data.chunks_exact_mut(2).zip(units) {
            dst.copy_from_slice(&unit.to_ne_bytes());
        }
        Ok(this)
    }

    /// Transcodes `units` into a new ANSI allocation on `heap`.
    pub(crate) fn ansi_from_units(heap: ForeignHeap, units: &[u16]) -> Result<Self> {
        let len = sys::ansi_len(units)?;
        let mut this = Self::allocate(ForeignKind::Ansi(heap), len)?;
        // On failure `this` is dropped, which zero-fills the partial output.
        sys::encode_ansi(units, &mut this.as_bytes_with_nul_mut()[..len])?;
        Ok(this)
    }

    /// Pointer to the first byte of string data.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Length of the string data in bytes, excluding the terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn kind(&self) -> ForeignKind {
        self.kind
    }

    /// String data, excluding the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// String data including the terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        let size = self.len + self.kind.terminator_len();
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), size) }
    }

    fn as_bytes_with_nul_mut(&mut self) -> &mut [u8] {
        let size = self.len + self.kind.terminator_len();
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), size) }
    }

    /// String data as UTF-16 code units, excluding the terminator. `None`
    /// for ANSI exports.
    pub fn as_units(&self) -> Option<&[u16]> {
        if !self.kind.is_wide() {
            return None;
        }
        // Foreign allocators return at least 2-byte aligned memory.
        let (head, units, _) = unsafe { self.as_bytes().align_to::<u16>() };
        debug_assert!(head.is_empty());
        Some(units)
    }

    /// Gives the allocation to the caller, who must eventually free it with
    /// the primitive matching [`kind`](Self::kind) or pass it back to
    /// [`from_raw`](Self::from_raw).
    pub fn into_raw(self) -> *mut u8 {
        let ptr = self.ptr.as_ptr();
        mem::forget(self);
        ptr
    }

    /// Takes ownership of an export previously released with
    /// [`into_raw`](Self::into_raw), so that dropping it zero-fills and
    /// frees it. `len` is the [`len`](Self::len) the buffer reported before
    /// it was released; the data may contain embedded zeros, so it is never
    /// recovered by scanning. Returns `None` for a null pointer.
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` on a buffer of the same `kind` and
    /// `len`, and must not have been freed.
    pub unsafe fn from_raw(ptr: *mut u8, kind: ForeignKind, len: usize) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        if kind == ForeignKind::Bstr {
            debug_assert_eq!(sys::bstr_byte_len(ptr), len);
        }
        Some(Self { ptr, len, kind })
    }
}

impl Drop for ForeignBuffer {
    fn drop(&mut self) {
        Zeroize::zeroize(self.as_bytes_with_nul_mut());
        unsafe { sys::free(self.kind, self.ptr) };
    }
}

impl fmt::Debug for ForeignBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuffer")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
