//! # uwb_hub
//!
//! Anchor ingestion: receives encrypted datagrams over UDP and drives them
//! through decrypt, decode, zone admission, state update and position
//! estimation.
//!
//! ## Pipeline
//!   1. Trial-decrypt with every enabled framing
//!   2. Split into lines, decode `UWB:` records and `TAG:` fixes
//!   3. Zone admission over every line; rejects never touch state
//!   4. Record diagnostics (undecoded datagrams stop here)
//!   5. Buffer every measurement from a roster anchor that names a tag
//!   6. Per touched tag: centroid solve, Kalman smoothing, store, forward
//!
//! Datagrams are handled strictly one at a time. Nothing a sender can put on
//! the wire stops the loop; receive errors are logged and the loop continues.

use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use uwb_types::{parse_tag_fix, parse_uwb_line, TagFix, UwbRecord};

use crate::config::ForwardMode;
use crate::crypto::DecryptionEngine;
use crate::forward::PositionForwarder;
use crate::kalman::TagFilterBank;
use crate::runtime_params::SharedParams;
use crate::state::{canonical_id, to_unix_secs, AnchorMeasurement, StateStore};
use crate::tdoa;
use crate::zone::{self, Admission};

const RECV_BUFFER_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// No framing produced a plausible line
    Undecoded,
    /// Foreign or missing zone; nothing was recorded
    ZoneRejected,
    Processed {
        measurements: usize,
        positions: usize,
    },
}

pub struct UwbHub {
    engine: DecryptionEngine,
    store: StateStore,
    params: SharedParams,
    filters: TagFilterBank,
    forwarder: PositionForwarder,
}

impl UwbHub {
    pub fn new(
        engine: DecryptionEngine,
        store: StateStore,
        params: SharedParams,
        forwarder: PositionForwarder,
    ) -> Self {
        Self { engine, store, params, filters: TagFilterBank::new(), forwarder }
    }

    pub async fn process_datagram(
        &mut self,
        data: &[u8],
        src: SocketAddr,
        received_at: DateTime<Utc>,
    ) -> DatagramOutcome {
        let Some(decoded) = self.engine.try_decrypt(data) else {
            debug!("UWB: {} bytes from {src} did not decode", data.len());
            self.store.record_message(src, data, None, None, received_at).await;
            return DatagramOutcome::Undecoded;
        };

        let lines: Vec<&str> = decoded.text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let records: Vec<UwbRecord> = lines.iter().filter_map(|l| parse_uwb_line(l)).collect();
        let fixes: Vec<TagFix> = lines.iter().filter_map(|l| parse_tag_fix(l)).collect();

        if let Admission::Rejected { expected, found } = zone::check(&self.params.zone().await, &lines) {
            debug!(
                "UWB: dropped datagram from {src}: zone {} (expected {expected})",
                found.as_deref().unwrap_or("<none>")
            );
            return DatagramOutcome::ZoneRejected;
        }

        self.store
            .record_message(src, data, Some(&decoded.text), Some(decoded.variant), received_at)
            .await;

        let buffer = self.params.buffer().await;
        if self.store.buffer_capacity().await != buffer.per_anchor_size.max(1) {
            info!("Anchor buffer capacity → {}", buffer.per_anchor_size);
            self.store.set_buffer_capacity(buffer.per_anchor_size).await;
        }

        let now = to_unix_secs(received_at);
        let roster = self.params.anchors().await;
        let known: HashSet<String> = roster.iter().map(|a| canonical_id(&a.id)).collect();
        let mut touched = BTreeSet::new();
        let mut measurements = 0;
        for record in &records {
            let Some(m) = AnchorMeasurement::from_record(record, now) else {
                continue;
            };
            // The solver only reads roster anchors; anything else would grow the buffer map.
            if !known.contains(&m.anchor_id) {
                debug!("UWB: measurement from unknown anchor {} ignored", m.anchor_id);
                continue;
            }
            touched.insert(m.tag_id.clone());
            let anchor_id = m.anchor_id.clone();
            self.store.append_anchor_measurement(&anchor_id, m).await;
            measurements += 1;
        }

        let mut positions = 0;
        if !touched.is_empty() {
            let solver = self.params.solver().await;
            for tag_id in &touched {
                let Some(est) =
                    tdoa::compute_position_for_tag(&self.store, &roster, tag_id, &buffer, &solver, now).await
                else {
                    continue;
                };
                debug!(
                    "UWB: tag {tag_id} sync={} anchors={} → ({:.2}, {:.2}, {:.2})",
                    est.debug.sync, est.debug.anchor_count, est.x, est.y, est.z
                );
                if self.publish(tag_id, est.x, est.y, est.z, now, solver.forward_mode).await {
                    positions += 1;
                }
            }
        }

        if !fixes.is_empty() {
            let mode = self.params.solver().await.forward_mode;
            for fix in &fixes {
                if self.publish(&canonical_id(&fix.tag_id), fix.x, fix.y, fix.z, now, mode).await {
                    positions += 1;
                }
            }
        }

        DatagramOutcome::Processed { measurements, positions }
    }

    /// Smooth a raw fix, store the result, then forward outside any lock.
    /// Returns false when the fix was not finite and nothing was published.
    async fn publish(&mut self, tag_id: &str, x: f64, y: f64, z: f64, t: f64, mode: ForwardMode) -> bool {
        let filter = self.params.filter().await;
        let smoothed = if z.is_finite() { self.filters.update(tag_id, t, x, y, &filter) } else { None };
        let Some(smoothed) = smoothed else {
            warn!("UWB: non-finite fix for tag {tag_id} dropped");
            return false;
        };
        self.store.set_tag_position(tag_id, smoothed.x, smoothed.y, z, t).await;
        match mode {
            ForwardMode::Filtered => self.forwarder.forward(tag_id, smoothed.x, smoothed.y, z, t).await,
            ForwardMode::Raw => self.forwarder.forward(tag_id, x, y, z, t).await,
        }
        true
    }
}

/// Receive loop. Runs for the lifetime of the process.
pub async fn run(socket: UdpSocket, mut hub: UwbHub) {
    if let Ok(addr) = socket.local_addr() {
        info!("📡 UWB ingestion listening on UDP {addr}");
    }
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                hub.process_datagram(&buf[..len], src, Utc::now()).await;
            }
            Err(e) => {
                warn!("UWB: UDP recv error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnchorConfig, ConfigHandle, ControllerConfig};
    use crate::runtime_params::RuntimeParams;
    use uwb_types::framing::{self, CipherKey, Framing};

    const KEY_HEX: &str = "00112233445566778899AABBCCDDEEFF";
    const TAG: &str = "0x02006655";

    fn config() -> ControllerConfig {
        let mut cfg = ControllerConfig::default();
        cfg.crypto.aes_key_hex = Some(KEY_HEX.into());
        cfg.tdoa.anchors = vec![
            AnchorConfig::new("0x04000020", 0.0, 0.0, 0.0),
            AnchorConfig::new("0x04000021", 10.0, 0.0, 0.0),
            AnchorConfig::new("0x04000022", 0.0, 10.0, 0.0),
        ];
        cfg.tdoa.runtime.expected_zone_id_hex = Some("0x5A31".into());
        cfg.tdoa.runtime.buffer.per_anchor_size = 8;
        cfg
    }

    fn hub(cfg: ControllerConfig) -> (UwbHub, StateStore) {
        let key = cfg.cipher_key().unwrap();
        let engine = DecryptionEngine::new(key, &cfg.crypto);
        let store = StateStore::new();
        let params = RuntimeParams::new(ConfigHandle::new(cfg));
        (UwbHub::new(engine, store.clone(), params, PositionForwarder::disabled()), store)
    }

    fn seal(text: &str) -> Vec<u8> {
        let key = CipherKey::from_hex(KEY_HEX).unwrap();
        framing::seal(Framing::GcmNonceFirst12, &key, text.as_bytes(), &[7u8; 16]).unwrap()
    }

    fn line(anchor: &str, zone: Option<&str>) -> String {
        let zone = zone.map(|z| format!(" zone_id={z}")).unwrap_or_default();
        format!("UWB: ver=1 sync=7 tag_seq=1 batt=90% anchor={anchor} tag={TAG} ts=1{zone}")
    }

    fn src() -> SocketAddr {
        "10.0.0.20:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn admitted_datagram_produces_position() {
        let (mut hub, store) = hub(config());
        let text = ["0x04000020", "0x04000021", "0x04000022"]
            .map(|a| line(a, Some("0x5A31")))
            .join("\n");
        let outcome = hub.process_datagram(&seal(&text), src(), Utc::now()).await;
        assert_eq!(outcome, DatagramOutcome::Processed { measurements: 3, positions: 1 });

        let pos = store.tag_position(TAG).await.unwrap();
        assert!((pos.x - 10.0 / 3.0).abs() < 1e-6, "x = {}", pos.x);
        assert!((pos.y - 10.0 / 3.0).abs() < 1e-6, "y = {}", pos.y);
        assert_eq!(store.anchor_buffer("0x04000021").await.len(), 1);
        assert_eq!(store.buffer_capacity().await, 8);

        let last = store.last_message().await.unwrap();
        assert_eq!(last.mode, Some(Framing::GcmNonceFirst12));
        assert_eq!(store.node_summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn foreign_or_missing_zone_leaves_state_untouched() {
        let (mut hub, store) = hub(config());
        for zone in [Some("0x5A32"), None] {
            let dg = seal(&line("0x04000020", zone));
            assert_eq!(hub.process_datagram(&dg, src(), Utc::now()).await, DatagramOutcome::ZoneRejected);
        }
        assert!(store.last_message().await.is_none());
        assert!(store.node_summaries().await.is_empty());
        assert!(store.anchor_buffer("0x04000020").await.is_empty());
        assert!(store.all_tag_positions().await.is_empty());
    }

    #[tokio::test]
    async fn undecodable_bytes_are_recorded_and_survived() {
        let (mut hub, store) = hub(config());
        let junk = vec![0xA5u8; 48];
        assert_eq!(hub.process_datagram(&junk, src(), Utc::now()).await, DatagramOutcome::Undecoded);
        let last = store.last_message().await.unwrap();
        assert_eq!(last.decoded, None);
        assert_eq!(last.raw_len, 48);
        assert!(store.node_summaries().await.is_empty());

        // The next valid datagram is still processed.
        let dg = seal(&line("0x04000020", Some("0x5A31")));
        assert!(matches!(
            hub.process_datagram(&dg, src(), Utc::now()).await,
            DatagramOutcome::Processed { measurements: 1, positions: 0 }
        ));
    }

    #[tokio::test]
    async fn zoneless_heartbeats_and_fixes_are_rejected() {
        let (mut hub, store) = hub(config());
        for text in ["HB: anchor=0x04000020 up=12", "TAG:T9,X:1,Y:2,Z:3"] {
            let outcome = hub.process_datagram(&seal(text), src(), Utc::now()).await;
            assert_eq!(outcome, DatagramOutcome::ZoneRejected, "{text}");
        }
        assert!(store.last_message().await.is_none());
        assert!(store.node_summaries().await.is_empty());
        assert!(store.all_tag_positions().await.is_empty());
    }

    #[tokio::test]
    async fn mixed_zone_datagram_is_dropped_whole() {
        let (mut hub, store) = hub(config());
        let text = [line("0x04000020", Some("0x5A31")), line("0x04000021", Some("0x5A32"))].join("\n");
        assert_eq!(hub.process_datagram(&seal(&text), src(), Utc::now()).await, DatagramOutcome::ZoneRejected);

        let text = [line("0x04000020", Some("0x5A31")), line("0x04000021", None)].join("\n");
        assert_eq!(hub.process_datagram(&seal(&text), src(), Utc::now()).await, DatagramOutcome::ZoneRejected);

        assert!(store.anchor_buffer("0x04000020").await.is_empty());
        assert!(store.anchor_buffer("0x04000021").await.is_empty());
        assert!(store.last_message().await.is_none());
    }

    #[tokio::test]
    async fn zoned_heartbeat_is_recorded() {
        let (mut hub, store) = hub(config());
        let outcome = hub
            .process_datagram(&seal("HB: anchor=0x04000020 up=12 zone_id=0x5A31"), src(), Utc::now())
            .await;
        assert_eq!(outcome, DatagramOutcome::Processed { measurements: 0, positions: 0 });
        let nodes = store.node_summaries().await;
        assert!(nodes[0].last_hb.is_some());
        assert!(nodes[0].last_meas.is_none());
    }

    #[tokio::test]
    async fn unknown_anchors_are_not_buffered() {
        let (mut hub, store) = hub(config());
        let text = [line("0x04000020", Some("0x5A31")), line("0x0BADBEEF", Some("0x5A31"))].join("\n");
        let outcome = hub.process_datagram(&seal(&text), src(), Utc::now()).await;
        assert_eq!(outcome, DatagramOutcome::Processed { measurements: 1, positions: 0 });
        assert_eq!(store.anchor_buffer("0x04000020").await.len(), 1);
        assert!(store.anchor_buffer("0x0BADBEEF").await.is_empty());
    }

    #[tokio::test]
    async fn tag_fix_lines_feed_the_filter() {
        let (mut hub, store) = hub(config());
        let text = "HB: anchor=0x04000020 zone_id=0x5A31\nTAG:T1,X:1.5,Y:2.5,Z:0.7";
        let outcome = hub.process_datagram(&seal(text), src(), Utc::now()).await;
        assert_eq!(outcome, DatagramOutcome::Processed { measurements: 0, positions: 1 });
        let pos = store.tag_position("T1").await.unwrap();
        assert!((pos.x - 1.5).abs() < 1e-6 && (pos.y - 2.5).abs() < 1e-6);
        assert_eq!(pos.z, 0.7);
    }

    #[tokio::test]
    async fn non_finite_fix_does_not_poison_the_tag() {
        let mut cfg = config();
        cfg.tdoa.runtime.expected_zone_id_hex = None;
        let (mut hub, store) = hub(cfg);
        hub.process_datagram(&seal("TAG:T1,X:1,Y:1,Z:0"), src(), Utc::now()).await;
        let outcome = hub.process_datagram(&seal("TAG:T1,X:NaN,Y:1,Z:0"), src(), Utc::now()).await;
        assert_eq!(outcome, DatagramOutcome::Processed { measurements: 0, positions: 0 });
        for _ in 0..4 {
            hub.process_datagram(&seal("TAG:T1,X:1,Y:1,Z:0"), src(), Utc::now()).await;
        }
        let pos = store.tag_position("T1").await.unwrap();
        assert!(pos.x.is_finite() && pos.y.is_finite(), "{pos:?}");
        assert!((pos.x - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn run_loop_ingests_from_socket() {
        let (hub, store) = hub(config());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(run(socket, hub));

        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        tx.send_to(&seal("HB: anchor=0x04000020 zone_id=0x5A31"), addr).await.unwrap();

        let mut seen = false;
        for _ in 0..100 {
            if store.last_message().await.is_some() {
                seen = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        task.abort();
        assert!(seen);
    }
}
