use core::{
    fmt,
    ops::{Deref, DerefMut},
};
use std::sync::Arc;

use log::{debug, error, trace};
use parking_lot::Mutex;

use crate::buffer::{aligned_capacity, ProtectedBuffer};
use crate::cipher::{self, MemoryCipher};
use crate::error::{Error, Result};
use crate::export::{ExportKind, ForeignBuffer, ForeignHeap, ForeignKind};
use crate::{BLOCK_SIZE, MAX_LENGTH};

/// A mutable secret kept encrypted in locked memory between operations.
///
/// The secret is a sequence of UTF-16 code units. Every operation that
/// touches the contents decrypts the buffer, does its work and encrypts it
/// again before returning, on success and on failure alike. Each instance
/// is guarded by its own lock, so a `SecureString` can be shared between
/// threads and no thread ever observes another's transient plaintext.
///
/// An instance can be sealed with [`make_read_only`](Self::make_read_only)
/// and torn down early with [`dispose`](Self::dispose); dropping it has the
/// same effect as disposing it.
///
/// # Examples
///
/// ```rust
/// use secure_string::{ExportKind, SecureString};
///
/// let secret = SecureString::new()?;
/// for unit in "s3cr3t".encode_utf16() {
///     secret.append(unit)?;
/// }
/// secret.make_read_only()?;
///
/// let exported = secret.export_as_null_terminated(ExportKind::Wide)?;
/// assert_eq!(exported.as_units(), Some(&"s3cr3t".encode_utf16().collect::<Vec<_>>()[..]));
/// // `exported` is zero-filled and freed here.
/// # Ok::<(), secure_string::Error>(())
/// ```
pub struct SecureString {
    // `None` once disposed.
    state: Mutex<Option<State>>,
}

struct State {
    buffer: ProtectedBuffer,
    len: usize,
    read_only: bool,
    encrypted: bool,
    cipher: Arc<dyn MemoryCipher>,
}

impl State {
    fn protect(&mut self) -> Result<()> {
        if self.len == 0 || self.encrypted {
            return Ok(());
        }

        let cipher = &self.cipher;
        self.buffer.with_bytes_mut(|bytes| cipher.encrypt(bytes))?;
        self.encrypted = true;
        Ok(())
    }

    fn unprotect(&mut self) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }

        if self.encrypted {
            let cipher = &self.cipher;
            self.buffer.with_bytes_mut(|bytes| cipher.decrypt(bytes))?;
        }
        self.encrypted = false;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.read_only {
            true => Err(Error::InvalidOperation),
            false => Ok(()),
        }
    }

    /// Grows the buffer to hold `capacity` units. Only called on plaintext.
    fn ensure_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity > MAX_LENGTH {
            return Err(Error::capacity(capacity, MAX_LENGTH));
        }
        if capacity <= self.buffer.capacity_units() {
            return Ok(());
        }

        let mut grown = ProtectedBuffer::allocate(aligned_capacity(capacity))?;
        debug!(
            "growing secure string from {} to {} units",
            self.buffer.capacity_units(),
            grown.capacity_units()
        );
        self.buffer.copy_into(&mut grown);
        core::mem::replace(&mut self.buffer, grown).zero_and_release();
        Ok(())
    }

    /// Runs `work` on the decrypted contents and re-encrypts afterwards.
    ///
    /// Re-encryption is attempted whatever `work` returns. If it fails, its
    /// error wins over the result of `work`.
    fn with_plaintext<R>(&mut self, work: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        let mut plaintext = Unprotected::open(self)?;
        let result = work(&mut *plaintext);
        plaintext.close()?;
        result
    }
}

/// A [`State`] whose buffer is currently decrypted.
///
/// [`close`](Self::close) re-encrypts and reports failure; if the guard is
/// dropped without closing, as on a panic, re-encryption still runs.
struct Unprotected<'a> {
    state: &'a mut State,
    closed: bool,
}

impl<'a> Unprotected<'a> {
    fn open(state: &'a mut State) -> Result<Self> {
        state.unprotect()?;
        Ok(Self {
            state,
            closed: false,
        })
    }

    fn close(mut self) -> Result<()> {
        self.closed = true;
        self.state.protect()
    }
}

impl Deref for Unprotected<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        self.state
    }
}

impl DerefMut for Unprotected<'_> {
    fn deref_mut(&mut self) -> &mut State {
        self.state
    }
}

impl Drop for Unprotected<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.state.protect() {
                error!("re-encryption failed while unwinding: {err}");
            }
        }
    }
}

impl SecureString {
    /// Creates an empty secret protected by the platform cipher.
    ///
    /// # Errors
    /// [`Error::NotSupported`] if the platform cannot encrypt memory
    /// in-process, [`Error::OutOfMemory`] if the buffer cannot be allocated.
    pub fn new() -> Result<Self> {
        Self::with_cipher(cipher::platform().ok_or(Error::NotSupported)?)
    }

    /// Creates an empty secret protected by `cipher`.
    pub fn with_cipher(cipher: Arc<dyn MemoryCipher>) -> Result<Self> {
        let buffer = ProtectedBuffer::allocate(BLOCK_SIZE)?;
        Ok(Self::from_state(State {
            buffer,
            len: 0,
            read_only: false,
            encrypted: false,
            cipher,
        }))
    }

    /// Creates a secret holding `chars`, protected by the platform cipher.
    ///
    /// The caller remains responsible for wiping `chars`.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] if `chars` is longer than [`MAX_LENGTH`],
    /// plus everything [`new`](Self::new) can return.
    pub fn from_chars(chars: &[u16]) -> Result<Self> {
        if chars.len() > MAX_LENGTH {
            return Err(Error::InvalidArgument {
                len: chars.len(),
                max: MAX_LENGTH,
            });
        }
        Self::from_chars_with_cipher(chars, cipher::platform().ok_or(Error::NotSupported)?)
    }

    /// Creates a secret holding `chars`, protected by `cipher`.
    pub fn from_chars_with_cipher(chars: &[u16], cipher: Arc<dyn MemoryCipher>) -> Result<Self> {
        if chars.len() > MAX_LENGTH {
            return Err(Error::InvalidArgument {
                len: chars.len(),
                max: MAX_LENGTH,
            });
        }

        let mut buffer = ProtectedBuffer::allocate_for(chars.len())?;
        buffer.with_units_mut(|units| units[..chars.len()].copy_from_slice(chars));

        let mut state = State {
            buffer,
            len: chars.len(),
            read_only: false,
            encrypted: false,
            cipher,
        };
        // On failure `state` drops here and its buffer is zero-filled.
        state.protect()?;
        Ok(Self::from_state(state))
    }

    fn from_state(state: State) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Locks the instance and runs `f` on its state, unless disposed.
    fn live<R>(&self, f: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) => f(state),
            None => Err(Error::ObjectDisposed),
        }
    }

    /// Like [`live`](Self::live), but also refuses sealed instances.
    fn writable<R>(&self, f: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        self.live(|state| {
            state.ensure_writable()?;
            f(state)
        })
    }

    /// Number of code units in the secret.
    pub fn len(&self) -> Result<usize> {
        self.live(|state| Ok(state.len))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.live(|state| Ok(state.len == 0))
    }

    /// Appends one code unit, growing the buffer when needed.
    ///
    /// # Errors
    /// [`Error::OutOfRange`] once the secret holds [`MAX_LENGTH`] units.
    pub fn append(&self, c: u16) -> Result<()> {
        self.writable(|state| {
            state.with_plaintext(|state| {
                let len = state.len;
                state.ensure_capacity(len + 1)?;
                state.buffer.with_units_mut(|units| units[len] = c);
                state.len += 1;
                Ok(())
            })
        })
    }

    /// Inserts one code unit before `index`; `index == len` appends.
    pub fn insert_at(&self, index: usize, c: u16) -> Result<()> {
        self.writable(|state| {
            if index > state.len {
                return Err(Error::index(index, state.len));
            }

            state.with_plaintext(|state| {
                let len = state.len;
                state.ensure_capacity(len + 1)?;
                state.buffer.with_units_mut(|units| {
                    units.copy_within(index..len, index + 1);
                    units[index] = c;
                });
                state.len += 1;
                Ok(())
            })
        })
    }

    /// Removes the code unit at `index`. The vacated tail unit is zeroed.
    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.writable(|state| {
            if index >= state.len {
                return Err(Error::index(index, state.len));
            }

            state.with_plaintext(|state| {
                let len = state.len;
                state.buffer.with_units_mut(|units| {
                    units.copy_within(index + 1..len, index);
                    units[len - 1] = 0;
                });
                state.len -= 1;
                Ok(())
            })
        })
    }

    /// Overwrites the code unit at `index`.
    pub fn set_at(&self, index: usize, c: u16) -> Result<()> {
        self.writable(|state| {
            if index >= state.len {
                return Err(Error::index(index, state.len));
            }

            state.with_plaintext(|state| {
                state.buffer.with_units_mut(|units| units[index] = c);
                Ok(())
            })
        })
    }

    /// Empties the secret and zero-fills the buffer. Capacity is kept.
    pub fn clear(&self) -> Result<()> {
        self.writable(|state| {
            state.len = 0;
            state.buffer.clear();
            state.encrypted = false;
            Ok(())
        })
    }

    /// Returns an independent copy with its own buffer.
    ///
    /// The copy carries over the contents (still encrypted) and the cipher,
    /// but not the read-only flag: copying a sealed secret yields a mutable
    /// one.
    pub fn copy(&self) -> Result<Self> {
        self.live(|state| {
            let mut buffer = ProtectedBuffer::allocate(state.buffer.capacity_units())?;
            state.buffer.copy_into(&mut buffer);

            Ok(Self::from_state(State {
                buffer,
                len: state.len,
                read_only: false,
                encrypted: state.encrypted,
                cipher: Arc::clone(&state.cipher),
            }))
        })
    }

    /// Seals the secret. There is no way back.
    pub fn make_read_only(&self) -> Result<()> {
        self.live(|state| {
            state.read_only = true;
            Ok(())
        })
    }

    pub fn is_read_only(&self) -> Result<bool> {
        self.live(|state| Ok(state.read_only))
    }

    /// Zero-fills and releases the buffer. Every later call except another
    /// `dispose` fails with [`Error::ObjectDisposed`].
    pub fn dispose(&self) {
        if let Some(state) = self.state.lock().take() {
            trace!("disposing secure string of {} units", state.len);
            state.buffer.zero_and_release();
        }
    }

    /// Copies the plaintext into a new null-terminated allocation on the
    /// global heap.
    ///
    /// Works on sealed instances. The secret itself is re-encrypted before
    /// this returns.
    pub fn export_as_null_terminated(&self, kind: ExportKind) -> Result<ForeignBuffer> {
        self.export_as_null_terminated_in(kind, ForeignHeap::default())
    }

    /// Like [`export_as_null_terminated`](Self::export_as_null_terminated),
    /// allocating from `heap`.
    pub fn export_as_null_terminated_in(
        &self,
        kind: ExportKind,
        heap: ForeignHeap,
    ) -> Result<ForeignBuffer> {
        self.export_with(|units| match kind {
            ExportKind::Wide => ForeignBuffer::wide_from_units(ForeignKind::Wide(heap), units),
            ExportKind::Ansi => ForeignBuffer::ansi_from_units(heap, units),
        })
    }

    /// Copies the plaintext into a new length-prefixed `BSTR`.
    pub fn export_as_bstr_style(&self) -> Result<ForeignBuffer> {
        self.export_with(|units| ForeignBuffer::wide_from_units(ForeignKind::Bstr, units))
    }

    // An export that fails part way, or whose re-encryption fails, is
    // dropped before the error propagates: `ForeignBuffer` zero-fills and
    // frees itself.
    fn export_with(
        &self,
        export: impl FnOnce(&[u16]) -> Result<ForeignBuffer>,
    ) -> Result<ForeignBuffer> {
        self.live(|state| {
            state.with_plaintext(|state| {
                let len = state.len;
                state.buffer.with_units(|units| export(&units[..len]))
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn is_encrypted_at_rest(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map_or(false, |state| state.encrypted)
    }

    #[cfg(test)]
    pub(crate) fn raw_units(&self) -> Vec<u16> {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.buffer.with_units(|units| units.to_vec()))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn capacity_units(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map_or(0, |state| state.buffer.capacity_units())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureString").finish_non_exhaustive()
    }
}
