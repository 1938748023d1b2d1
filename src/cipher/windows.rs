use core::ffi::c_void;
use std::io;

use windows_sys::Win32::Security::Cryptography::{
    CryptProtectMemory, CryptUnprotectMemory, CRYPTPROTECTMEMORY_BLOCK_SIZE,
    CRYPTPROTECTMEMORY_SAME_PROCESS,
};

use super::{check_region, MemoryCipher, BLOCK_BYTES};
use crate::error::CipherStatus;

const _: () = assert!(CRYPTPROTECTMEMORY_BLOCK_SIZE as usize == BLOCK_BYTES);

/// `CryptProtectMemory` scoped to the current process.
pub struct CryptProtectCipher(());

impl CryptProtectCipher {
    /// Encrypts and decrypts one block to make sure the primitive is present.
    pub(super) fn probe() -> Result<Self, CipherStatus> {
        let this = Self(());
        let mut block = [0u8; BLOCK_BYTES];
        this.encrypt(&mut block)?;
        this.decrypt(&mut block)?;
        Ok(this)
    }
}

#[inline]
fn last_status() -> CipherStatus {
    CipherStatus(io::Error::last_os_error().raw_os_error().unwrap_or(-1))
}

impl MemoryCipher for CryptProtectCipher {
    fn encrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus> {
        check_region(region)?;
        let len = u32::try_from(region.len()).map_err(|_| CipherStatus(super::INVALID_LENGTH))?;
        match unsafe {
            CryptProtectMemory(
                region.as_mut_ptr() as *mut c_void,
                len,
                CRYPTPROTECTMEMORY_SAME_PROCESS,
            )
        } {
            0 => Err(last_status()),
            _ => Ok(()),
        }
    }

    fn decrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus> {
        check_region(region)?;
        let len = u32::try_from(region.len()).map_err(|_| CipherStatus(super::INVALID_LENGTH))?;
        match unsafe {
            CryptUnprotectMemory(
                region.as_mut_ptr() as *mut c_void,
                len,
                CRYPTPROTECTMEMORY_SAME_PROCESS,
            )
        } {
            0 => Err(last_status()),
            _ => Ok(()),
        }
    }
}
