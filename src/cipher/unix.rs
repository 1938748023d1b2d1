use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes256,
};

use super::{check_region, MemoryCipher, BLOCK_BYTES, INVALID_LENGTH};
use crate::alloc::{LockedMemory, PlatformMemory};
use crate::error::CipherStatus;

const KEY_LEN: usize = 32;

/// AES-256 keyed by a random per-process secret, applied to each
/// [`BLOCK_BYTES`] block on its own.
///
/// The key is drawn from the OS once and lives in locked memory for the life
/// of the process. Every block is permuted independently of its address and
/// its neighbours, so ciphertext stays valid when copied between buffers and
/// no keystream is shared between regions.
pub struct ProcessKeyCipher {
    key: PlatformMemory,
}

impl ProcessKeyCipher {
    /// Draws a fresh process key and checks that it can be used.
    pub(super) fn probe() -> Result<Self, CipherStatus> {
        let mut key = PlatformMemory::with_length(KEY_LEN)
            .map_err(|err| CipherStatus(err.raw_os_error().unwrap_or(-1)))?;

        getrandom::fill(key.as_mut())
            .map_err(|err| CipherStatus(err.raw_os_error().unwrap_or(-1)))?;

        let this = Self { key };
        let mut block = [0u8; BLOCK_BYTES];
        this.encrypt(&mut block)?;
        this.decrypt(&mut block)?;
        Ok(this)
    }

    // The expanded key schedule is wiped when it drops.
    fn schedule(&self) -> Result<Aes256, CipherStatus> {
        Aes256::new_from_slice(self.key.as_ref()).map_err(|_| CipherStatus(INVALID_LENGTH))
    }
}

impl MemoryCipher for ProcessKeyCipher {
    fn encrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus> {
        check_region(region)?;
        let aes = self.schedule()?;
        for block in region.chunks_exact_mut(BLOCK_BYTES) {
            aes.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn decrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus> {
        check_region(region)?;
        let aes = self.schedule()?;
        for block in region.chunks_exact_mut(BLOCK_BYTES) {
            aes.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_probes_use_distinct_keys() {
        let a = ProcessKeyCipher::probe().expect("Failed to probe");
        let b = ProcessKeyCipher::probe().expect("Failed to probe");

        let mut x = [0u8; BLOCK_BYTES * 2];
        let mut y = [0u8; BLOCK_BYTES * 2];
        a.encrypt(&mut x).expect("Failed to encrypt");
        b.encrypt(&mut y).expect("Failed to encrypt");
        assert_ne!(x, y);
    }

    #[test]
    fn test_ciphertext_is_position_independent() {
        let cipher = ProcessKeyCipher::probe().expect("Failed to probe");
        let mut first = [7u8; BLOCK_BYTES];
        cipher.encrypt(&mut first).expect("Failed to encrypt");

        let mut moved = Box::new(first);
        cipher.decrypt(&mut moved[..]).expect("Failed to decrypt");
        assert_eq!(*moved, [7u8; BLOCK_BYTES]);
    }

    #[test]
    fn test_regions_do_not_share_a_keystream() {
        let cipher = ProcessKeyCipher::probe().expect("Failed to probe");
        let zeros = [0u8; BLOCK_BYTES];
        let mut plain = [0u8; BLOCK_BYTES];
        plain[..8].copy_from_slice(b"hunter2!");

        let mut a = zeros;
        let mut b = plain;
        cipher.encrypt(&mut a).expect("Failed to encrypt");
        cipher.encrypt(&mut b).expect("Failed to encrypt");

        let xored: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x ^ y).collect();
        assert_ne!(&xored[..], &plain[..]);
    }
}
