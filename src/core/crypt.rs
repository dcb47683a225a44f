//! # XOR Obfuscation
//!
//! The R2 client obfuscates packets with a single-shot XOR against a fixed
//! key blob shipped inside the game resources. The first 6 bytes of the blob
//! cover the packet header, the remainder (2991 bytes in the original
//! resource) covers the body.
//!
//! This is obfuscation, not encryption: the pass is self-inverse, and a body
//! longer than the key is only partially covered, with bytes past the key
//! length travelling in the clear. Both quirks are part of the wire format
//! and must be preserved for compatibility with the client.
//!
//! The keys are read-only process-wide state, injected once at startup via
//! [`init`].

use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::{NetError, Result};

/// Byte length of the header slice of the key blob.
pub const HEADER_KEY_LEN: usize = 6;

static KEYS: OnceLock<CryptKeys> = OnceLock::new();

/// The two key slices derived from the injected resource blob.
#[derive(Debug)]
pub struct CryptKeys {
    headers_key: [u8; HEADER_KEY_LEN],
    data_key: Vec<u8>,
}

impl CryptKeys {
    fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() < HEADER_KEY_LEN {
            return Err(NetError::KeyBlobTooShort(blob.len()));
        }

        let mut headers_key = [0u8; HEADER_KEY_LEN];
        headers_key.copy_from_slice(&blob[..HEADER_KEY_LEN]);

        Ok(Self {
            headers_key,
            data_key: blob[HEADER_KEY_LEN..].to_vec(),
        })
    }

    /// XOR the 6 header bytes with the header key. Self-inverse.
    pub fn crypt_headers(&self, headers: &mut [u8]) {
        xor_in_place(headers, &self.headers_key);
    }

    /// XOR a packet body with the body key. Self-inverse.
    ///
    /// Bodies longer than the key are only partially covered; the original
    /// server behaves identically, so the tail is left untouched.
    pub fn crypt_body(&self, data: &mut [u8]) {
        if data.len() > self.data_key.len() {
            warn!(
                body_len = data.len(),
                key_len = self.data_key.len(),
                "packet body exceeds obfuscation key, tail left unobfuscated"
            );
        }
        xor_in_place(data, &self.data_key);
    }
}

fn xor_in_place(region: &mut [u8], key: &[u8]) {
    for (b, k) in region.iter_mut().zip(key) {
        *b ^= k;
    }
}

/// Install the obfuscation key blob: first 6 bytes for headers, the rest for
/// bodies.
///
/// First caller wins; a repeated call is a logged no-op so that the keys stay
/// stable for the lifetime of the process.
pub fn init(blob: &[u8]) -> Result<()> {
    let keys = CryptKeys::from_blob(blob)?;
    if KEYS.set(keys).is_err() {
        debug!("obfuscation keys already initialized, keeping the first blob");
    }
    Ok(())
}

/// The process-wide keys, or [`NetError::KeysNotInitialized`] before [`init`].
pub fn keys() -> Result<&'static CryptKeys> {
    KEYS.get().ok_or(NetError::KeysNotInitialized)
}
