//! # uwb-types
//!
//! Shared wire structures for the Zona UWB positioning system.
//!
//! These types are used by:
//! - `backend-rust` (`zona-controller`): trial-decrypting anchor datagrams and
//!   decoding the `UWB:` line protocol
//! - `packages/uwb-simulator`: producing sealed anchor datagrams for development
//!
//! ## Wire layering
//!
//! ```text
//! UDP payload ──framing──▶ ASCII line(s) ──protocol──▶ UwbRecord
//! ```
//!
//! No framing variant carries an out-of-band discriminator, so a receiver has
//! to try each one and accept the first plaintext that [`looks_like_line`].

use serde::{Deserialize, Serialize};

pub mod framing;
pub mod protocol;

pub use framing::{CipherKey, Framing, FramingError, KeyError, UnknownFraming};
pub use protocol::{parse_tag_fix, parse_uwb_line, FieldValue, TagFix, UwbRecord};

// ── Geometry ──────────────────────────────────────────────────────────────────

/// 3D position in the site frame (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ── Plaintext validation ──────────────────────────────────────────────────────

/// Line starts accepted as a plausible anchor plaintext.
pub const PRINTABLE_PREFIXES: [&str; 7] = ["UWB:", "BLINK:", "TAG", "ver=", "HB", "HB:", "HB "];

/// Prefixes that classify a decoded line as an anchor heartbeat.
pub const HEARTBEAT_PREFIXES: [&str; 3] = ["HB", "HB:", "HB "];

fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| matches!(b, 0x09 | 0x0A | 0x0D) || (0x20..=0x7E).contains(&b))
}

/// Heuristic check that a candidate plaintext is an anchor line.
///
/// CTR framing has no integrity check at all, and a GCM tag only proves the
/// key was right, so every candidate must also be printable ASCII (tab, CR
/// and LF allowed) and start, after trimming, with a known line prefix.
pub fn looks_like_line(plaintext: &[u8]) -> bool {
    if plaintext.is_empty() || !is_printable_ascii(plaintext) {
        return false;
    }
    // Printable ASCII is always valid UTF-8.
    let Ok(text) = std::str::from_utf8(plaintext) else {
        return false;
    };
    let text = text.trim();
    !text.is_empty() && PRINTABLE_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// True if the decoded text is a heartbeat line rather than a measurement.
pub fn is_heartbeat(text: &str) -> bool {
    let text = text.trim();
    HEARTBEAT_PREFIXES.iter().any(|p| text.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_prefixes() {
        assert!(looks_like_line(b"UWB: ver=1 sync=3"));
        assert!(looks_like_line(b"  HB anchor=0x01\r\n"));
        assert!(looks_like_line(b"BLINK:\tx"));
        assert!(looks_like_line(b"TAG:1,X:0,Y:0,Z:0"));
        assert!(looks_like_line(b"ver=2"));
    }

    #[test]
    fn rejects_unknown_prefix_and_binary() {
        assert!(!looks_like_line(b""));
        assert!(!looks_like_line(b"   \r\n"));
        assert!(!looks_like_line(b"hello world"));
        assert!(!looks_like_line(b"UWB: ver=1\x00"));
        assert!(!looks_like_line(&[0x55, 0x57, 0x42, 0x3A, 0xC3, 0xA9]));
    }

    #[test]
    fn heartbeat_classification() {
        assert!(is_heartbeat("HB: up=12"));
        assert!(is_heartbeat(" HB anchor=0x1"));
        assert!(!is_heartbeat("UWB: ver=1"));
    }
}
