//! Reversible, same-process encryption of memory regions.
//!
//! A [`SecureString`](crate::SecureString) never performs cryptography itself:
//! it brackets every access with [`MemoryCipher::decrypt`] and
//! [`MemoryCipher::encrypt`] on whatever cipher it was built with. The
//! platform cipher is probed once per process by [`platform`].

use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use crate::error::CipherStatus;

#[cfg(target_family = "unix")]
mod unix;
#[cfg(target_family = "windows")]
mod windows;

#[cfg(target_family = "unix")]
use self::unix::ProcessKeyCipher as PlatformCipher;
#[cfg(target_family = "windows")]
use self::windows::CryptProtectCipher as PlatformCipher;

/// Granularity, in bytes, of every region passed to a [`MemoryCipher`].
pub const BLOCK_BYTES: usize = 16;

/// In-place, reversible encryption of a memory region, valid only inside
/// the current process.
///
/// Regions are always a whole number of [`BLOCK_BYTES`] long, and a region
/// is always decrypted with the same length it was encrypted with.
pub trait MemoryCipher: Send + Sync {
    /// Encrypts `region` in place.
    fn encrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus>;

    /// Decrypts `region` in place, reversing [`encrypt`](Self::encrypt).
    fn decrypt(&self, region: &mut [u8]) -> Result<(), CipherStatus>;
}

/// Returns the process-wide platform cipher, or `None` when this platform
/// cannot encrypt memory in-process.
///
/// The probe runs once; its outcome is cached for the life of the process.
pub fn platform() -> Option<Arc<dyn MemoryCipher>> {
    static PLATFORM: OnceLock<Option<Arc<dyn MemoryCipher>>> = OnceLock::new();

    PLATFORM
        .get_or_init(|| match PlatformCipher::probe() {
            Ok(cipher) => {
                debug!("in-process memory encryption available");
                Some(Arc::new(cipher) as Arc<dyn MemoryCipher>)
            }
            Err(status) => {
                warn!("in-process memory encryption unavailable: {status}");
                None
            }
        })
        .clone()
}

#[inline]
fn check_region(region: &[u8]) -> Result<(), CipherStatus> {
    match region.len() % BLOCK_BYTES {
        0 => Ok(()),
        _ => Err(CipherStatus(INVALID_LENGTH)),
    }
}

// ERROR_INVALID_PARAMETER on Windows, EINVAL elsewhere.
#[cfg(target_family = "windows")]
const INVALID_LENGTH: i32 = 87;
#[cfg(not(target_family = "windows"))]
const INVALID_LENGTH: i32 = 22;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_is_cached() {
        let first = platform();
        let second = platform();
        match (first, second) {
            (Some(a), Some(b)) => assert!(Arc::ptr_eq(&a, &b)),
            (None, None) => {}
            _ => panic!("probe outcome changed between calls"),
        }
    }

    #[test]
    fn test_platform_round_trip() {
        let Some(cipher) = platform() else { return };
        let plain: Vec<u8> = (0..BLOCK_BYTES as u8 * 4).collect();
        let mut region = plain.clone();

        cipher.encrypt(&mut region).expect("Failed to encrypt");
        assert_ne!(region, plain);
        cipher.decrypt(&mut region).expect("Failed to decrypt");
        assert_eq!(region, plain);
    }

    #[test]
    fn test_unaligned_region_rejected() {
        let Some(cipher) = platform() else { return };
        let mut region = [0u8; BLOCK_BYTES + 1];
        assert!(cipher.encrypt(&mut region).is_err());
        assert!(cipher.decrypt(&mut region).is_err());
    }
}
