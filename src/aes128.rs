use aes::Aes128;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::AesGcm;
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};

#[cfg(feature = "ground-station")]
use rand::random;

use crate::error::{CommsError, Result};
use crate::reed_solomon::RS_MESSAGE_LEN;

pub const AES_KEY_SIZE: usize = 16;
pub const AES_IV_SIZE: usize = 16;
pub const AES_TAG_SIZE: usize = 16;

/// Usable plaintext per block in counter mode.
pub const AES_CTR_PAYLOAD_LEN: usize = RS_MESSAGE_LEN - AES_IV_SIZE;

/// Usable plaintext per block in GCM mode, the tag sits between the IV and the ciphertext.
pub const AES_GCM_PAYLOAD_LEN: usize = RS_MESSAGE_LEN - AES_IV_SIZE - AES_TAG_SIZE;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// AES-128-GCM with a full 16-byte IV as the nonce.
type Aes128Gcm16 = AesGcm<Aes128, U16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherMode {
    /// AES-128-CTR, confidentiality only.
    #[default]
    Ctr,
    /// AES-128-GCM, confidentiality and integrity.
    Gcm,
}

/// The pre-shared key and the mode it is used in.
///
/// Built once at start-up and never mutated, so encode and decode tasks can share one
/// instance behind an `Arc`.
#[derive(Clone)]
pub struct AesContext {
    key: [u8; AES_KEY_SIZE],
    mode: CipherMode,
}

impl std::fmt::Debug for AesContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.debug_struct("AesContext").field("mode", &self.mode).finish_non_exhaustive();
    }
}

impl AesContext {
    pub fn new(key: &[u8], mode: CipherMode) -> Result<Self> {
        let key: [u8; AES_KEY_SIZE] = key
            .try_into()
            .map_err(|_| CommsError::InvalidArgument("AES key must be 16 bytes"))?;

        return Ok(AesContext { key: key, mode: mode });
    }

    pub fn mode(&self) -> CipherMode {
        return self.mode;
    }

    /// Plaintext bytes that fit in one 223-byte block under this context's mode.
    pub fn payload_capacity(&self) -> usize {
        return match self.mode {
            CipherMode::Ctr => AES_CTR_PAYLOAD_LEN,
            CipherMode::Gcm => AES_GCM_PAYLOAD_LEN,
        };
    }

    /// Encrypts `data` in place.
    ///
    /// # Returns
    /// The GCM tag in GCM mode, `None` in counter mode.
    pub fn encrypt(&self, data: &mut [u8], iv: &[u8; AES_IV_SIZE]) -> Result<Option<[u8; AES_TAG_SIZE]>> {
        if data.len() > self.payload_capacity() {
            return Err(CommsError::InvalidArgument("plaintext exceeds the AES block capacity"));
        }

        return match self.mode {
            CipherMode::Ctr => {
                let mut cipher: Aes128Ctr = Aes128Ctr::new(&self.key.into(), iv.into());
                cipher.apply_keystream(data);
                Ok(None)
            }
            CipherMode::Gcm => {
                let cipher: Aes128Gcm16 = Aes128Gcm16::new(GenericArray::from_slice(&self.key));
                let tag = cipher
                    .encrypt_in_place_detached(GenericArray::from_slice(iv), &[], data)
                    .map_err(|_| CommsError::InvalidArgument("GCM encryption failed"))?;

                let mut tag_bytes: [u8; AES_TAG_SIZE] = [0u8; AES_TAG_SIZE];
                tag_bytes.copy_from_slice(&tag);
                Ok(Some(tag_bytes))
            }
        };
    }

    /// Decrypts `data` in place. GCM mode requires the tag and fails with `AuthFailed`
    /// without revealing any plaintext if it doesn't verify.
    pub fn decrypt(&self, data: &mut [u8], iv: &[u8; AES_IV_SIZE], tag: Option<&[u8; AES_TAG_SIZE]>) -> Result<()> {
        if data.len() > self.payload_capacity() {
            return Err(CommsError::InvalidArgument("ciphertext exceeds the AES block capacity"));
        }

        return match self.mode {
            CipherMode::Ctr => {
                let mut cipher: Aes128Ctr = Aes128Ctr::new(&self.key.into(), iv.into());
                cipher.apply_keystream(data);
                Ok(())
            }
            CipherMode::Gcm => {
                let tag: &[u8; AES_TAG_SIZE] = tag.ok_or(CommsError::InvalidArgument("GCM decryption needs a tag"))?;
                let cipher: Aes128Gcm16 = Aes128Gcm16::new(GenericArray::from_slice(&self.key));
                cipher
                    .decrypt_in_place_detached(
                        GenericArray::from_slice(iv),
                        &[],
                        data,
                        GenericArray::from_slice(tag),
                    )
                    .map_err(|_| CommsError::AuthFailed)
            }
        };
    }

    /// Lays a plaintext out as one 223-byte block: `IV | [tag] | ciphertext`, the plaintext
    /// zero-padded to the block capacity before encryption.
    pub fn seal_block(&self, plaintext: &[u8], iv: &[u8; AES_IV_SIZE]) -> Result<[u8; RS_MESSAGE_LEN]> {
        let capacity: usize = self.payload_capacity();
        if plaintext.len() > capacity {
            return Err(CommsError::BufferTooSmall {
                needed: plaintext.len(),
                available: capacity,
            });
        }

        let mut block: [u8; RS_MESSAGE_LEN] = [0u8; RS_MESSAGE_LEN];
        block[..AES_IV_SIZE].copy_from_slice(iv);

        let cipher_start: usize = RS_MESSAGE_LEN - capacity;
        block[cipher_start..cipher_start + plaintext.len()].copy_from_slice(plaintext);

        if let Some(tag) = self.encrypt(&mut block[cipher_start..], iv)? {
            block[AES_IV_SIZE..AES_IV_SIZE + AES_TAG_SIZE].copy_from_slice(&tag);
        }

        return Ok(block);
    }

    /// Inverse of [`AesContext::seal_block`], returns the full zero-padded plaintext.
    pub fn open_block(&self, block: &[u8; RS_MESSAGE_LEN]) -> Result<Vec<u8>> {
        let mut iv: [u8; AES_IV_SIZE] = [0u8; AES_IV_SIZE];
        iv.copy_from_slice(&block[..AES_IV_SIZE]);

        let cipher_start: usize = RS_MESSAGE_LEN - self.payload_capacity();
        let mut plaintext: Vec<u8> = block[cipher_start..].to_vec();

        match self.mode {
            CipherMode::Ctr => self.decrypt(&mut plaintext, &iv, None)?,
            CipherMode::Gcm => {
                let mut tag: [u8; AES_TAG_SIZE] = [0u8; AES_TAG_SIZE];
                tag.copy_from_slice(&block[AES_IV_SIZE..AES_IV_SIZE + AES_TAG_SIZE]);
                self.decrypt(&mut plaintext, &iv, Some(&tag))?;
            }
        }

        return Ok(plaintext);
    }
}

/// A fresh random IV for one uplink packet.
#[cfg(feature = "ground-station")]
pub fn generate_iv() -> [u8; AES_IV_SIZE] {
    return random();
}
