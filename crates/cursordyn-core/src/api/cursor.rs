//! Opaque, authenticated pagination cursors.
//!
//! A cursor is `base64url(version || nonce || ciphertext || tag)` where the
//! ciphertext is the JSON of a [`Key`] sealed with AES-256-GCM. The AES key is
//! derived from the table's cursor secret with SHA-256, and the version byte is
//! bound as associated data.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CursorError;
use crate::types::Key;

const CURSOR_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_DERIVATION_TAG: &[u8] = b"cursordyn/cursor/v1";

/// Opaque continuation token handed to callers.
///
/// Callers pass it back verbatim; its contents are meaningless without the
/// table's cursor secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Cursor(s)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}

/// Seals and opens cursors under one secret.
#[derive(Clone)]
pub struct CursorCodec {
    cipher: Aes256Gcm,
}

impl CursorCodec {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_TAG);
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Seal a continuation key. `None` stays `None`.
    pub fn encode(&self, key: Option<&Key>) -> Result<Option<Cursor>, CursorError> {
        let Some(key) = key else {
            return Ok(None);
        };
        let plaintext = serde_json::to_vec(key).map_err(|_| CursorError::Encrypt)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &[CURSOR_VERSION],
                },
            )
            .map_err(|_| CursorError::Encrypt)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        out.push(CURSOR_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(Some(Cursor(URL_SAFE_NO_PAD.encode(out))))
    }

    /// Open a cursor. `None` and the empty string both mean "start over".
    pub fn decode(&self, cursor: Option<&Cursor>) -> Result<Option<Key>, CursorError> {
        let Some(cursor) = cursor.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let raw = URL_SAFE_NO_PAD
            .decode(cursor.as_str())
            .map_err(|_| CursorError::Malformed)?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(CursorError::Malformed);
        }
        if raw[0] != CURSOR_VERSION {
            return Err(CursorError::UnsupportedVersion(raw[0]));
        }

        let (nonce, sealed) = raw[1..].split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &raw[..1],
                },
            )
            .map_err(|_| CursorError::Authentication)?;

        let key: Key = serde_json::from_slice(&plaintext).map_err(|_| CursorError::Malformed)?;
        if key.is_empty() {
            return Err(CursorError::Malformed);
        }
        Ok(Some(key))
    }
}

impl fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

/// One-shot [`CursorCodec::encode`].
pub fn encode_cursor(key: Option<&Key>, secret: &str) -> Result<Option<Cursor>, CursorError> {
    CursorCodec::new(secret).encode(key)
}

/// One-shot [`CursorCodec::decode`].
pub fn decode_cursor(cursor: Option<&Cursor>, secret: &str) -> Result<Option<Key>, CursorError> {
    CursorCodec::new(secret).decode(cursor)
}
