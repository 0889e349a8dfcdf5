//! Encrypted payload envelope for agent channels.
//!
//! When a VM carries credentials, every RPC payload travels as
//! `{encrypted_data, session_id}`. Cipher: AES-256-GCM keyed from the
//! VM's credentials, with the session id bound as AAD. Session ids are
//! opaque; collisions are not defended against at this layer.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use armada_id::SessionId;
use base64::Engine;
use rand::RngCore;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::AgentCredentials;

const NONCE_BYTES: usize = 12;

/// Envelope crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The credential key is not valid base64 of 32 bytes.
    #[error("invalid credential key")]
    InvalidKey,

    /// Payload encryption failed.
    #[error("encryption failed")]
    EncryptFailed,

    /// Payload decryption or authentication failed.
    #[error("decryption failed")]
    DecryptFailed,

    /// The encrypted payload is structurally malformed.
    #[error("malformed encrypted payload: {0}")]
    Malformed(String),
}

/// Per-agent payload sealer/opener.
pub struct CredentialEnvelope {
    cipher: Aes256Gcm,
    session_id: SessionId,
}

impl CredentialEnvelope {
    /// Build an envelope from a VM's credentials with a fresh session.
    pub fn new(credentials: &AgentCredentials) -> Result<Self, CryptoError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&credentials.key)
            .map_err(|_| CryptoError::InvalidKey)?;

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            cipher,
            session_id: SessionId::new(),
        })
    }

    /// The session this envelope seals under.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Seal a payload into the `{encrypted_data, session_id}` shape.
    pub fn seal(&self, payload: &Value) -> Result<Value, CryptoError> {
        let plaintext = serde_json::to_vec(payload).map_err(|_| CryptoError::EncryptFailed)?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let session = self.session_id.to_string();
        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: session.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut framed = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);

        Ok(json!({
            "encrypted_data": base64::engine::general_purpose::STANDARD.encode(framed),
            "session_id": session,
        }))
    }

    /// Open a reply payload.
    ///
    /// Plaintext replies (no `encrypted_data`) pass through untouched.
    /// Failed decryption is converted to `{exception: "CryptError: …"}`
    /// so downstream error handling stays uniform.
    pub fn open(&self, reply: Value) -> Value {
        if reply.get("encrypted_data").is_none() {
            return reply;
        }

        match self.open_inner(&reply) {
            Ok(value) => value,
            Err(e) => json!({ "exception": format!("CryptError: {e}") }),
        }
    }

    fn open_inner(&self, reply: &Value) -> Result<Value, CryptoError> {
        let data = reply["encrypted_data"]
            .as_str()
            .ok_or_else(|| CryptoError::Malformed("encrypted_data is not a string".to_string()))?;

        let session = reply["session_id"]
            .as_str()
            .ok_or_else(|| CryptoError::Malformed("session_id missing".to_string()))?;

        let framed = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        if framed.len() <= NONCE_BYTES {
            return Err(CryptoError::Malformed("payload too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_BYTES);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: session.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)?;

        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}
