//! Anchor payload framing.
//!
//! Anchors seal each line with a pre-shared AES key using one of three
//! framings. Byte layouts (L = datagram length):
//!
//! ```text
//! GCM_NONCE_FIRST12  [ nonce 12 | ciphertext | tag 16 ]      L > 28
//! GCM_NONCE_ZERO     [ ciphertext | tag 16 ]  nonce = 0^12   L > 16
//! CTR_IV_FIRST16     [ counter 16 (BE) | ciphertext ]        L > 16
//! ```
//!
//! CTR framing is unauthenticated: `open` succeeds for any input long enough,
//! so callers must validate the plaintext themselves.

use std::fmt;
use std::str::FromStr;

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

pub const GCM_NONCE_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
pub const CTR_IV_LEN: usize = 16;

// ── Framing variants ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Framing {
    /// AES-GCM, nonce carried in the first 12 bytes
    GcmNonceFirst12,
    /// AES-GCM, all-zero nonce
    GcmNonceZero,
    /// AES-CTR, initial counter block carried in the first 16 bytes
    CtrIvFirst16,
}

impl Framing {
    /// Trial order used by receivers.
    pub const PRIORITY: [Framing; 3] = [Self::GcmNonceFirst12, Self::GcmNonceZero, Self::CtrIvFirst16];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GcmNonceFirst12 => "GCM_NONCE_FIRST12",
            Self::GcmNonceZero => "GCM_NONCE_ZERO",
            Self::CtrIvFirst16 => "CTR_IV_FIRST16",
        }
    }

    /// Smallest datagram length this framing can apply to, exclusive.
    pub fn min_len_exclusive(&self) -> usize {
        match self {
            Self::GcmNonceFirst12 => GCM_NONCE_LEN + GCM_TAG_LEN,
            Self::GcmNonceZero => GCM_TAG_LEN,
            Self::CtrIvFirst16 => CTR_IV_LEN,
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown framing `{0}`")]
pub struct UnknownFraming(pub String);

impl FromStr for Framing {
    type Err = UnknownFraming;

    /// Accepts the canonical names, case-insensitively, with `-` or `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::PRIORITY
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| UnknownFraming(s.to_string()))
    }
}

// ── Key material ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("AES key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("AES key must be 16, 24 or 32 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("AEAD seal failed")]
    Seal,
}

/// Pre-shared AES key.
#[derive(Clone, PartialEq, Eq)]
pub enum CipherKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key bytes
        write!(f, "CipherKey::Aes{}(..)", self.bits())
    }
}

impl CipherKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        match bytes.len() {
            16 => Ok(Self::Aes128(bytes.try_into().map_err(|_| KeyError::Length(16))?)),
            24 => Ok(Self::Aes192(bytes.try_into().map_err(|_| KeyError::Length(24))?)),
            32 => Ok(Self::Aes256(bytes.try_into().map_err(|_| KeyError::Length(32))?)),
            n => Err(KeyError::Length(n)),
        }
    }

    pub fn from_hex(text: &str) -> Result<Self, KeyError> {
        Self::from_bytes(&hex::decode(text.trim())?)
    }

    pub fn bits(&self) -> usize {
        match self {
            Self::Aes128(_) => 128,
            Self::Aes192(_) => 192,
            Self::Aes256(_) => 256,
        }
    }
}

// ── Cipher primitives ─────────────────────────────────────────────────────────

fn gcm_decrypt<C>(key: &[u8], nonce: &[u8; GCM_NONCE_LEN], payload: &[u8]) -> Option<Vec<u8>>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).ok()?;
    cipher.decrypt(GenericArray::from_slice(nonce), payload).ok()
}

fn gcm_encrypt<C>(key: &[u8], nonce: &[u8; GCM_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, FramingError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| FramingError::Seal)?;
    cipher
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| FramingError::Seal)
}

fn ctr_apply<C>(key: &[u8], iv: &[u8; CTR_IV_LEN], buf: &mut [u8]) -> Option<()>
where
    C: KeyIvInit + StreamCipher,
{
    let mut cipher = C::new_from_slices(key, iv).ok()?;
    cipher.try_apply_keystream(buf).ok()
}

fn gcm_open(key: &CipherKey, nonce: &[u8; GCM_NONCE_LEN], payload: &[u8]) -> Option<Vec<u8>> {
    match key {
        CipherKey::Aes128(k) => gcm_decrypt::<Aes128Gcm>(k, nonce, payload),
        CipherKey::Aes192(k) => gcm_decrypt::<Aes192Gcm>(k, nonce, payload),
        CipherKey::Aes256(k) => gcm_decrypt::<Aes256Gcm>(k, nonce, payload),
    }
}

fn gcm_seal(key: &CipherKey, nonce: &[u8; GCM_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, FramingError> {
    match key {
        CipherKey::Aes128(k) => gcm_encrypt::<Aes128Gcm>(k, nonce, plaintext),
        CipherKey::Aes192(k) => gcm_encrypt::<Aes192Gcm>(k, nonce, plaintext),
        CipherKey::Aes256(k) => gcm_encrypt::<Aes256Gcm>(k, nonce, plaintext),
    }
}

/// CTR is symmetric: the same call encrypts and decrypts.
fn ctr_xor(key: &CipherKey, iv: &[u8; CTR_IV_LEN], buf: &mut [u8]) -> Option<()> {
    match key {
        CipherKey::Aes128(k) => ctr_apply::<ctr::Ctr128BE<Aes128>>(k, iv, buf),
        CipherKey::Aes192(k) => ctr_apply::<ctr::Ctr128BE<Aes192>>(k, iv, buf),
        CipherKey::Aes256(k) => ctr_apply::<ctr::Ctr128BE<Aes256>>(k, iv, buf),
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Recover the plaintext of `data` under one framing.
///
/// `None` means the framing is inapplicable: too short, or a GCM tag mismatch.
pub fn open(framing: Framing, key: &CipherKey, data: &[u8]) -> Option<Vec<u8>> {
    if data.len() <= framing.min_len_exclusive() {
        return None;
    }
    match framing {
        Framing::GcmNonceFirst12 => {
            let (nonce, payload) = data.split_at(GCM_NONCE_LEN);
            gcm_open(key, nonce.try_into().ok()?, payload)
        }
        Framing::GcmNonceZero => gcm_open(key, &[0u8; GCM_NONCE_LEN], data),
        Framing::CtrIvFirst16 => {
            let (iv, ciphertext) = data.split_at(CTR_IV_LEN);
            let mut buf = ciphertext.to_vec();
            ctr_xor(key, iv.try_into().ok()?, &mut buf)?;
            Some(buf)
        }
    }
}

/// Seal `plaintext` the way an anchor does.
///
/// `iv` supplies the nonce (first 12 bytes) for `GcmNonceFirst12` and the
/// initial counter block for `CtrIvFirst16`; `GcmNonceZero` ignores it.
pub fn seal(framing: Framing, key: &CipherKey, plaintext: &[u8], iv: &[u8; CTR_IV_LEN]) -> Result<Vec<u8>, FramingError> {
    match framing {
        Framing::GcmNonceFirst12 => {
            let mut nonce = [0u8; GCM_NONCE_LEN];
            nonce.copy_from_slice(&iv[..GCM_NONCE_LEN]);
            let sealed = gcm_seal(key, &nonce, plaintext)?;
            let mut out = Vec::with_capacity(GCM_NONCE_LEN + sealed.len());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&sealed);
            Ok(out)
        }
        Framing::GcmNonceZero => gcm_seal(key, &[0u8; GCM_NONCE_LEN], plaintext),
        Framing::CtrIvFirst16 => {
            let mut body = plaintext.to_vec();
            ctr_xor(key, iv, &mut body).ok_or(FramingError::Seal)?;
            let mut out = Vec::with_capacity(CTR_IV_LEN + body.len());
            out.extend_from_slice(iv);
            out.extend_from_slice(&body);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_names_parse() {
        assert_eq!("GCM_NONCE_FIRST12".parse::<Framing>(), Ok(Framing::GcmNonceFirst12));
        assert_eq!("ctr-iv-first16".parse::<Framing>(), Ok(Framing::CtrIvFirst16));
        assert!("NONE".parse::<Framing>().is_err());
    }

    const KEY_HEX: &str = "00112233445566778899AABBCCDDEEFF";
    const IV: [u8; 16] = [
        0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
        0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    ];

    #[test]
    fn test_key_from_hex() {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        assert_eq!(key.bits(), 128);
        assert!(matches!(CipherKey::from_hex("0011"), Err(KeyError::Length(2))));
        assert!(matches!(CipherKey::from_hex("zz"), Err(KeyError::Hex(_))));
        assert_eq!(format!("{key:?}"), "CipherKey::Aes128(..)");
    }

    #[test]
    fn test_gcm_first12_layout() {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        let sealed = seal(Framing::GcmNonceFirst12, &key, b"UWB: ver=1", &IV).unwrap();
        assert_eq!(&sealed[..12], &IV[..12]);
        assert_eq!(sealed.len(), 12 + 10 + 16);
        assert_eq!(open(Framing::GcmNonceFirst12, &key, &sealed).unwrap(), b"UWB: ver=1");
    }

    #[test]
    fn test_gcm_tag_mismatch_is_inapplicable() {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        let mut sealed = seal(Framing::GcmNonceZero, &key, b"HB: up=1", &IV).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(Framing::GcmNonceZero, &key, &sealed).is_none());
    }

    #[test]
    fn test_ctr_partial_block_roundtrip() {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        let plaintext = [b'A'; 40];
        let sealed = seal(Framing::CtrIvFirst16, &key, &plaintext, &IV).unwrap();
        assert_eq!(&sealed[..16], &IV);
        assert_ne!(&sealed[16..], &plaintext[..]);
        assert_eq!(open(Framing::CtrIvFirst16, &key, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_length_gates() {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        assert!(open(Framing::GcmNonceFirst12, &key, &[0u8; 28]).is_none());
        assert!(open(Framing::GcmNonceZero, &key, &[0u8; 16]).is_none());
        assert!(open(Framing::CtrIvFirst16, &key, &[0u8; 16]).is_none());
        // CTR has no integrity check: any longer input "opens"
        assert_eq!(open(Framing::CtrIvFirst16, &key, &[0u8; 17]).map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_aes256_key() {
        let key = CipherKey::from_bytes(&[7u8; 32]).unwrap();
        let sealed = seal(Framing::GcmNonceZero, &key, b"UWB: sync=1", &IV).unwrap();
        assert_eq!(open(Framing::GcmNonceZero, &key, &sealed).unwrap(), b"UWB: sync=1");
    }
}
