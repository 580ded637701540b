//! Pre-shared key payload encryption.
//!
//! Payloads are sealed with AES in ECB mode under PKCS#7 padding. There is no
//! IV or nonce, so equal plaintexts under one key produce equal ciphertexts.
//! The frame header stays in the clear.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use ecb::cipher::block_padding::Pkcs7;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use thiserror::Error;

pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid key length {0}: expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),

    #[error("ciphertext length {0} is not a positive multiple of the block size")]
    UnalignedCiphertext(usize),

    #[error("invalid padding after decryption")]
    BadPadding,
}

#[derive(Clone)]
pub struct PayloadCipher {
    key: Vec<u8>,
}

impl PayloadCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        match key.len() {
            16 | 24 | 32 => Ok(Self { key: key.to_vec() }),
            n => Err(CipherError::InvalidKeyLength(n)),
        }
    }

    /// Ciphertext length for a plaintext of `len` bytes. Padding always adds at least one byte.
    pub fn sealed_len(len: usize) -> usize {
        (len / BLOCK_SIZE + 1) * BLOCK_SIZE
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self.key.len() {
            16 => seal::<ecb::Encryptor<Aes128>>(&self.key, plaintext),
            24 => seal::<ecb::Encryptor<Aes192>>(&self.key, plaintext),
            _ => seal::<ecb::Encryptor<Aes256>>(&self.key, plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::UnalignedCiphertext(ciphertext.len()));
        }
        match self.key.len() {
            16 => open::<ecb::Decryptor<Aes128>>(&self.key, ciphertext),
            24 => open::<ecb::Decryptor<Aes192>>(&self.key, ciphertext),
            _ => open::<ecb::Decryptor<Aes256>>(&self.key, ciphertext),
        }
    }
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadCipher(AES-{})", self.key.len() * 8)
    }
}

fn seal<E: BlockEncryptMut + KeyInit>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let encryptor = E::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn open<D: BlockDecryptMut + KeyInit>(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let decryptor = D::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::BadPadding)
}
