//! Value Serialization
//!
//! Converts typed values to the byte payloads stored in tiers. The serializer
//! is stateless; payload transforms (compression, encryption) are tracked by
//! flags on [`Payload`] rather than by inspecting content.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Stored payload plus the transforms already applied to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Bytes,
    compressed: bool,
    encrypted: bool,
}

impl Payload {
    /// Untransformed payload
    pub fn plain(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            compressed: false,
            encrypted: false,
        }
    }

    pub(crate) fn from_parts(bytes: Bytes, compressed: bool, encrypted: bool) -> Self {
        Self {
            bytes,
            compressed,
            encrypted,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Stored size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub(crate) fn into_compressed(self, bytes: Bytes) -> Self {
        Self {
            bytes,
            compressed: true,
            encrypted: self.encrypted,
        }
    }

    pub(crate) fn into_encrypted(self, bytes: Bytes) -> Self {
        Self {
            bytes,
            compressed: self.compressed,
            encrypted: true,
        }
    }
}

/// JSON serializer for cached values
#[derive(Debug, Default, Clone, Copy)]
pub struct Serializer;

impl Serializer {
    /// Encode a value. Fails if the value has no JSON representation
    /// (e.g. a map with non-string keys).
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Payload::plain(bytes))
    }

    /// Decode plain (already decompressed and decrypted) bytes
    pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Symmetric payload cipher applied after compression
pub trait PayloadCipher: Send + Sync {
    /// Identifier used in logs and errors
    fn name(&self) -> &str;

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// Encrypt a payload with an optional cipher; already-encrypted payloads pass through
pub(crate) fn seal(payload: Payload, cipher: Option<&dyn PayloadCipher>) -> Result<Payload> {
    match cipher {
        Some(cipher) if !payload.is_encrypted() => {
            let sealed = cipher.encrypt(payload.bytes())?;
            Ok(payload.into_encrypted(Bytes::from(sealed)))
        }
        _ => Ok(payload),
    }
}

/// Remove encryption, returning a payload with `encrypted == false`
pub(crate) fn unseal(payload: Payload, cipher: Option<&dyn PayloadCipher>) -> Result<Payload> {
    if !payload.is_encrypted() {
        return Ok(payload);
    }
    let cipher = cipher.ok_or_else(|| Error::Cipher {
        cipher: "none".into(),
        reason: "payload is encrypted but no cipher is configured".into(),
    })?;
    let plain = cipher.decrypt(payload.bytes())?;
    Ok(Payload::from_parts(
        Bytes::from(plain),
        payload.is_compressed(),
        false,
    ))
}
