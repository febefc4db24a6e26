// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Enclave
//!
//! Local key-generation boundary: produces a fresh secp256k1 keypair,
//! returns the derived address plus the private key wrapped under a
//! per-call AES-256-GCM key, and an opaque attestation record.
//!
//! ## Wrapped-key blob format
//!
//! Base64 of `wrappingKey(32) ‖ nonce(12) ‖ authTag(16) ‖ ciphertext(32)`,
//! 92 bytes before encoding. The ciphertext is the raw private-key bytes
//! with no prefix.
//!
//! ## Security Note
//!
//! Shipping the wrapping key inside the blob is inert against anyone who
//! holds the blob; a real deployment wraps under a recipient-supplied public
//! key and this interface is shaped for that substitution. The attestation
//! record is a placeholder with a frozen delivery format; its content is
//! not interpreted anywhere in this service.

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use alloy::signers::local::PrivateKeySigner;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};

/// Byte length of the wrapped blob before base64 encoding.
pub const WRAPPED_BLOB_LEN: usize = 32 + 12 + 16 + 32;

/// Errors raised during key generation and wrapping.
#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    #[error("Key wrapping failed: {0}")]
    Wrap(String),
}

/// Output of one key-generation call.
#[derive(Debug, Clone)]
pub struct GeneratedWallet {
    /// Lower-cased 0x address derived from the fresh key.
    pub address: String,
    /// Wrapped private key, base64-encoded.
    pub encrypted_key_for_user: String,
    /// Opaque attestation record, delivered verbatim to the caller.
    pub attestation_report: String,
    /// Handle for in-process signing with the same key. Never emitted.
    pub key_ref: String,
}

/// Software key enclave. Generated signers are retained in-process, keyed by
/// `key_ref`, so the service can later sign with a session's fresh key.
#[derive(Default)]
pub struct KeyEnclave {
    keys: Mutex<HashMap<String, PrivateKeySigner>>,
}

impl KeyEnclave {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh keypair and wrap its private key.
    pub fn generate(&self) -> Result<GeneratedWallet, EnclaveError> {
        let mut key_bytes = [0u8; 32];
        let signer = loop {
            OsRng.fill_bytes(&mut key_bytes);
            // A uniform 32-byte string is outside the secp256k1 scalar field
            // with probability ~2^-128; resample on that rejection.
            if let Ok(signer) = PrivateKeySigner::from_slice(&key_bytes) {
                break signer;
            }
        };
        let address = signer.address().to_string().to_lowercase();

        let mut wrapping_key = [0u8; 32];
        OsRng.fill_bytes(&mut wrapping_key);
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&wrapping_key)
            .map_err(|e| EnclaveError::Wrap(e.to_string()))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), key_bytes.as_ref())
            .map_err(|e| EnclaveError::Wrap(e.to_string()))?;
        // aes-gcm returns ciphertext ‖ tag; the blob layout wants the tag first.
        let (ciphertext, auth_tag) = sealed.split_at(32);

        let mut blob = Vec::with_capacity(WRAPPED_BLOB_LEN);
        blob.extend_from_slice(&wrapping_key);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(auth_tag);
        blob.extend_from_slice(ciphertext);
        let encrypted_key_for_user = STANDARD.encode(&blob);

        let key_ref = uuid::Uuid::new_v4().to_string();
        let attestation_report = serde_json::json!({
            "version": 1,
            "provider": "software-keygen",
            "address": address,
            "issuedAt": Utc::now().to_rfc3339(),
        })
        .to_string();

        self.keys
            .lock()
            .unwrap()
            .insert(key_ref.clone(), signer);

        Ok(GeneratedWallet {
            address,
            encrypted_key_for_user,
            attestation_report,
            key_ref,
        })
    }

    /// Retrieve the retained signer for a key reference.
    pub fn signer_for(&self, key_ref: &str) -> Option<PrivateKeySigner> {
        self.keys.lock().unwrap().get(key_ref).cloned()
    }
}
