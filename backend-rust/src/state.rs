//! # state
//!
//! Shared controller state: the last-message diagnostics, per-node
//! summaries, bounded per-anchor measurement buffers and per-tag positions.
//!
//! Every operation goes through one lock, and nothing under the lock does
//! I/O. Readers always receive copies.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uwb_types::{is_heartbeat, protocol::parse_hex_id, Framing, UwbRecord};

pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Seconds since the Unix epoch.
pub fn to_unix_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Normalize an anchor/tag identifier so roster entries, wire tokens and
/// query parameters compare equal: hex ids become `0x` + uppercase digits
/// (width preserved), anything else is kept trimmed as-is.
pub fn canonical_id(raw: &str) -> String {
    let raw = raw.trim();
    if parse_hex_id(raw).is_none() {
        return raw.to_string();
    }
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    format!("0x{}", digits.to_ascii_uppercase())
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Diagnostic snapshot of one received datagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEntry {
    /// Receipt time, Unix seconds
    pub time: f64,
    pub received_at: DateTime<Utc>,
    pub from: String,
    pub raw_len: usize,
    pub raw_hex: String,
    pub decoded: Option<String>,
    /// Framing that produced `decoded`; `None` when nothing decoded
    pub mode: Option<Framing>,
}

/// Per source address, each slot last-write-wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hb: Option<MessageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_meas: Option<MessageEntry>,
}

/// One buffered observation of a tag by an anchor. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorMeasurement {
    pub anchor_id: String,
    pub tag_id: String,
    /// Controller receipt time, Unix seconds
    pub ts_recv: f64,
    /// Anchor device timestamp
    pub ts_raw: Option<i64>,
    pub uwb: UwbRecord,
}

impl AnchorMeasurement {
    /// Build from a decoded record; `None` unless both anchor and tag are present.
    pub fn from_record(record: &UwbRecord, ts_recv: f64) -> Option<Self> {
        Some(Self {
            anchor_id: canonical_id(record.anchor_hex()?),
            tag_id: canonical_id(record.tag_hex()?),
            ts_recv,
            ts_raw: record.ts_raw(),
            uwb: record.clone(),
        })
    }

    pub fn sync(&self) -> Option<i64> {
        self.uwb.sync()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TagPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub time: f64,
}

// ── Store ─────────────────────────────────────────────────────────────────────

struct StoreInner {
    last_msg: Option<MessageEntry>,
    nodes: BTreeMap<String, NodeRecord>,
    anchor_buffers: HashMap<String, VecDeque<AnchorMeasurement>>,
    buffer_capacity: usize,
    tag_positions: BTreeMap<String, TagPosition>,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                last_msg: None,
                nodes: BTreeMap::new(),
                anchor_buffers: HashMap::new(),
                buffer_capacity: DEFAULT_BUFFER_CAPACITY,
                tag_positions: BTreeMap::new(),
            })),
        }
    }

    /// Update the last-message slot and, for decoded datagrams, the node record.
    pub async fn record_message(
        &self,
        addr: SocketAddr,
        raw: &[u8],
        decoded: Option<&str>,
        mode: Option<Framing>,
        received_at: DateTime<Utc>,
    ) {
        // Build everything before taking the lock.
        let entry = MessageEntry {
            time: to_unix_secs(received_at),
            received_at,
            from: addr.to_string(),
            raw_len: raw.len(),
            raw_hex: hex::encode(raw),
            decoded: decoded.map(str::to_string),
            mode,
        };
        let node_update = decoded.map(|text| (is_heartbeat(text), entry.clone()));

        let mut inner = self.inner.write().await;
        inner.last_msg = Some(entry);
        if let Some((heartbeat, entry)) = node_update {
            let node = inner.nodes.entry(entry.from.clone()).or_insert_with(|| NodeRecord {
                addr: entry.from.clone(),
                last_hb: None,
                last_meas: None,
            });
            if heartbeat {
                node.last_hb = Some(entry);
            } else {
                node.last_meas = Some(entry);
            }
        }
    }

    /// Bounded append; the oldest entry is evicted on overflow.
    pub async fn append_anchor_measurement(&self, anchor_id: &str, measurement: AnchorMeasurement) {
        let mut inner = self.inner.write().await;
        let capacity = inner.buffer_capacity;
        let buf = inner
            .anchor_buffers
            .entry(anchor_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        while buf.len() >= capacity {
            buf.pop_front();
        }
        buf.push_back(measurement);
    }

    /// Apply a new global capacity (clamped to ≥ 1). Every buffer keeps only
    /// its most recent `n` entries.
    pub async fn set_buffer_capacity(&self, n: usize) {
        let n = n.max(1);
        let mut inner = self.inner.write().await;
        inner.buffer_capacity = n;
        for buf in inner.anchor_buffers.values_mut() {
            let excess = buf.len().saturating_sub(n);
            buf.drain(..excess);
            buf.shrink_to(n);
        }
    }

    pub async fn buffer_capacity(&self) -> usize {
        self.inner.read().await.buffer_capacity
    }

    /// Copy of one anchor buffer, oldest first.
    pub async fn anchor_buffer(&self, anchor_id: &str) -> Vec<AnchorMeasurement> {
        let inner = self.inner.read().await;
        inner
            .anchor_buffers
            .get(anchor_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn set_tag_position(&self, tag_id: &str, x: f64, y: f64, z: f64, time: f64) {
        let mut inner = self.inner.write().await;
        inner.tag_positions.insert(tag_id.to_string(), TagPosition { x, y, z, time });
    }

    pub async fn tag_position(&self, tag_id: &str) -> Option<TagPosition> {
        self.inner.read().await.tag_positions.get(tag_id).copied()
    }

    pub async fn all_tag_positions(&self) -> BTreeMap<String, TagPosition> {
        self.inner.read().await.tag_positions.clone()
    }

    pub async fn node_summaries(&self) -> Vec<NodeRecord> {
        self.inner.read().await.nodes.values().cloned().collect()
    }

    pub async fn last_message(&self) -> Option<MessageEntry> {
        self.inner.read().await.last_msg.clone()
    }
}
