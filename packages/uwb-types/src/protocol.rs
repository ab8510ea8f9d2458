//! `UWB:` line protocol.
//!
//! ```text
//! UWB: ver=1 sync=60 tag_seq=12 batt=90% anchor=0x04000020 tag=0x02006655 ts=908823146933 zone_id=0x5A31
//! ```
//!
//! Tokens are unordered and the key set is open: unknown keys are carried
//! through verbatim. Recognized keys are coerced, and a failed coercion keeps
//! the raw string instead of failing the line.

use std::collections::BTreeMap;

use serde::Serialize;

/// One decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Decimal integer (`ver`, `sync`, `tag_seq`, `batt_percent`, `ts_raw`)
    Int(i64),
    /// Base-16 identifier (`anchor_id`, `tag_id`, `zone_id`)
    Id(u64),
    /// Raw token text
    Text(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Field mapping of one `UWB:` line, raw and derived keys side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UwbRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl UwbRecord {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_int)
    }

    fn id(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(FieldValue::as_id)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn version(&self) -> Option<i64> { self.int("ver") }
    /// Broadcast round this measurement belongs to
    pub fn sync(&self) -> Option<i64> { self.int("sync") }
    pub fn tag_seq(&self) -> Option<i64> { self.int("tag_seq") }
    pub fn batt_percent(&self) -> Option<i64> { self.int("batt_percent") }
    /// Raw device timestamp (anchor clock units)
    pub fn ts_raw(&self) -> Option<i64> { self.int("ts_raw") }

    pub fn anchor_hex(&self) -> Option<&str> { self.text("anchor_hex") }
    pub fn anchor_id(&self) -> Option<u64> { self.id("anchor_id") }
    pub fn tag_hex(&self) -> Option<&str> { self.text("tag_hex") }
    pub fn tag_id(&self) -> Option<u64> { self.id("tag_id") }
    pub fn zone_id_hex(&self) -> Option<&str> { self.text("zone_id_hex") }
    pub fn zone_id(&self) -> Option<u64> { self.id("zone_id") }

    /// Both identifiers present: the record can feed an anchor buffer.
    pub fn is_actionable(&self) -> bool {
        self.anchor_hex().is_some() && self.tag_hex().is_some()
    }

    fn insert(&mut self, key: &str, value: FieldValue) {
        self.fields.insert(key.to_string(), value);
    }
}

/// Parse a hex identifier with or without a `0x` prefix.
pub fn parse_hex_id(value: &str) -> Option<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Decode one `UWB:` line. Any other line kind yields `None`.
pub fn parse_uwb_line(line: &str) -> Option<UwbRecord> {
    let payload = line.trim().strip_prefix("UWB:")?;
    let mut record = UwbRecord::default();

    for token in payload.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        record.insert(key, FieldValue::Text(value.to_string()));

        match key {
            "ver" | "sync" | "tag_seq" => {
                if let Ok(v) = value.parse::<i64>() {
                    record.insert(key, FieldValue::Int(v));
                }
            }
            "batt" => {
                if let Some(Ok(pct)) = value.strip_suffix('%').map(str::parse::<i64>) {
                    record.insert("batt_percent", FieldValue::Int(pct));
                }
            }
            "ts" => {
                if let Ok(v) = value.parse::<i64>() {
                    record.insert("ts_raw", FieldValue::Int(v));
                }
            }
            "anchor" | "tag" | "zone_id" => {
                let (hex_key, id_key) = match key {
                    "anchor" => ("anchor_hex", "anchor_id"),
                    "tag" => ("tag_hex", "tag_id"),
                    _ => ("zone_id_hex", "zone_id"),
                };
                record.insert(hex_key, FieldValue::Text(value.to_string()));
                if let Some(id) = parse_hex_id(value) {
                    record.insert(id_key, FieldValue::Id(id));
                }
            }
            _ => {}
        }
    }

    Some(record)
}

/// Pre-computed position fix: `TAG:<id>,X:<x>,Y:<y>,Z:<z>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagFix {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Decode a `TAG:` fix line. Keys are case-insensitive and missing axes
/// default to zero; an unparsable or non-finite axis rejects the whole line.
pub fn parse_tag_fix(line: &str) -> Option<TagFix> {
    let axis = |value: &str| value.parse::<f64>().ok().filter(|v| v.is_finite());
    let mut tag_id = None;
    let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
    for part in line.trim().split(',') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "TAG" => tag_id = Some(value.to_string()),
            "X" => x = axis(value)?,
            "Y" => y = axis(value)?,
            "Z" => z = axis(value)?,
            _ => {}
        }
    }
    let tag_id = tag_id.filter(|id| !id.is_empty())?;
    Some(TagFix { tag_id, x, y, z })
}
