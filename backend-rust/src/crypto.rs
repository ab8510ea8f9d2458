//! # crypto
//!
//! Trial decryption of anchor datagrams.
//!
//! A datagram carries no hint of which framing sealed it, so each enabled
//! framing is tried in fixed priority order and the first plaintext that both
//! opens and passes [`looks_like_line`] wins. A failed attempt only means
//! "this framing does not apply"; nothing is surfaced.

use uwb_types::framing::{self, CipherKey, Framing};
use uwb_types::looks_like_line;

use crate::config::CryptoConfig;

/// Datagrams this short cannot hold any framing.
pub const MIN_DATAGRAM_LEN_EXCLUSIVE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Plaintext, trimmed
    pub text: String,
    pub variant: Framing,
}

pub struct DecryptionEngine {
    key: CipherKey,
    variants: Vec<Framing>,
}

impl DecryptionEngine {
    pub fn new(key: CipherKey, cfg: &CryptoConfig) -> Self {
        let variants = Framing::PRIORITY
            .into_iter()
            .filter(|f| match f {
                Framing::GcmNonceFirst12 => cfg.enable_gcm_first_nonce,
                Framing::GcmNonceZero => cfg.enable_gcm_zero_nonce,
                Framing::CtrIvFirst16 => cfg.enable_ctr_first_iv,
            })
            .collect();
        Self { key, variants }
    }

    pub fn variants(&self) -> &[Framing] {
        &self.variants
    }

    pub fn try_decrypt(&self, data: &[u8]) -> Option<Decoded> {
        if data.len() <= MIN_DATAGRAM_LEN_EXCLUSIVE {
            return None;
        }
        self.variants.iter().find_map(|&variant| {
            let plaintext = framing::open(variant, &self.key, data)?;
            if !looks_like_line(&plaintext) {
                return None;
            }
            // looks_like_line guarantees ASCII
            let text = String::from_utf8(plaintext).ok()?;
            Some(Decoded { text: text.trim().to_string(), variant })
        })
    }
}
