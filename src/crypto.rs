// ABOUTME: AES-256-GCM encryption for GitHub credentials at rest
// ABOUTME: Provides TokenEncryptor for encrypt/decrypt and hex key generation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Authenticated encryption for upstream credentials.
//!
//! Ciphertexts are `base64(nonce ∥ sealed)` with a fresh random 96-bit
//! nonce per call. The key is a hex-encoded 32-byte value supplied at
//! startup; anything else is rejected before the server accepts traffic.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{AppError, AppResult};

/// Encrypts and decrypts credential material with a fixed process-wide key.
pub struct TokenEncryptor {
    key: Vec<u8>,
}

impl TokenEncryptor {
    /// Create an encryptor from a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid hex or does not decode to
    /// exactly 32 bytes.
    pub fn new(hex_key: &str) -> AppResult<Self> {
        let key = hex::decode(hex_key.trim())
            .map_err(|e| AppError::invalid_input(format!("encryption key is not valid hex: {e}")))?;
        if key.len() != 32 {
            return Err(AppError::invalid_input(format!(
                "encryption key must be 32 bytes (64 hex chars), got {} bytes",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    /// Encrypt a plaintext, returning base64 of the nonce-prefixed sealed box.
    ///
    /// # Errors
    ///
    /// Returns an error if nonce generation or sealing fails.
    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|e| AppError::internal(format!("failed to generate nonce: {e}")))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|e| AppError::internal(format!("failed to create sealing key: {e}")))?;
        let key = LessSafeKey::new(unbound_key);

        let mut data = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut data)
            .map_err(|e| AppError::internal(format!("failed to encrypt: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(data);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a ciphertext produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64, is too short to
    /// carry a nonce, or fails tag verification.
    pub fn decrypt(&self, encoded: &str) -> AppResult<String> {
        let combined = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::invalid_ciphertext(format!("not valid base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::invalid_ciphertext("ciphertext too short"));
        }

        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::assume_unique_for_key(
            nonce_bytes
                .try_into()
                .map_err(|_| AppError::invalid_ciphertext("bad nonce length"))?,
        );

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|e| AppError::internal(format!("failed to create opening key: {e}")))?;
        let key = LessSafeKey::new(unbound_key);

        let mut data = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut data)
            .map_err(|_| AppError::invalid_ciphertext("authentication failed"))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AppError::invalid_ciphertext(format!("not valid UTF-8: {e}")))
    }
}

/// Generate a fresh random 32-byte key, hex-encoded.
///
/// # Errors
///
/// Returns an error if the system RNG fails.
pub fn generate_key() -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut key = [0u8; 32];
    rng.fill(&mut key)
        .map_err(|e| AppError::internal(format!("failed to generate key: {e}")))?;
    Ok(hex::encode(key))
}
