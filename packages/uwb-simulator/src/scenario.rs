//! scenario.rs — anchor layout, tag motion and per-epoch line generation
//!
//! Every epoch each anchor reports every tag it heard in one datagram, all
//! lines stamped with the epoch number as `sync`. The `ts` field is a
//! DW1000-style 40-bit device timestamp: epoch time plus time of flight plus
//! Gaussian jitter, so it carries the arrival-time differences a real
//! multilateration solver would use.

use std::f64::consts::TAU;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use uwb_types::Vec3;

/// One DW1000 timestamp tick (s): 1 / (128 × 499.2 MHz)
const DW_TICK_S: f64 = 1.0 / (128.0 * 499.2e6);
const DW_TS_MASK: u64 = (1 << 40) - 1;
const C_M_PER_S: f64 = 299_792_458.0;

#[derive(Debug, Clone, Deserialize)]
pub struct SimAnchor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SimAnchor {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// Tag circling `center` once per `period_s`; a zero period parks it.
#[derive(Debug, Clone, Deserialize)]
pub struct SimTag {
    pub id: String,
    pub center_x: f64,
    pub center_y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub radius_m: f64,
    #[serde(default)]
    pub period_s: f64,
}

impl SimTag {
    pub fn position_at(&self, t: f64) -> Vec3 {
        if self.period_s <= 0.0 {
            return Vec3::new(self.center_x, self.center_y, self.z);
        }
        let angle = TAU * t / self.period_s;
        Vec3::new(
            self.center_x + self.radius_m * angle.cos(),
            self.center_y + self.radius_m * angle.sin(),
            self.z,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub anchors: Vec<SimAnchor>,
    pub tags: Vec<SimTag>,
    /// Omitted from lines when unset
    pub zone_id_hex: Option<String>,
    /// Heartbeat datagram per anchor every N epochs (0 = never)
    pub heartbeat_every: u32,
    /// σ of the device timestamp jitter, in ticks
    pub ts_noise_ticks: f64,
    /// Probability that an anchor misses a tag in an epoch
    pub drop_rate: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        let anchor = |id: &str, x, y| SimAnchor { id: id.to_string(), x, y, z: 2.5 };
        Self {
            anchors: vec![
                anchor("0x04000020", 0.0, 0.0),
                anchor("0x04000021", 20.0, 0.0),
                anchor("0x04000022", 20.0, 20.0),
                anchor("0x04000023", 0.0, 20.0),
            ],
            tags: vec![
                SimTag { id: "0x02006655".into(), center_x: 10.0, center_y: 10.0, z: 1.0, radius_m: 5.0, period_s: 30.0 },
                SimTag { id: "0x02006656".into(), center_x: 6.0, center_y: 12.0, z: 1.0, radius_m: 0.0, period_s: 0.0 },
            ],
            zone_id_hex: Some("0x5A31".into()),
            heartbeat_every: 10,
            ts_noise_ticks: 20.0,
            drop_rate: 0.0,
        }
    }
}

/// Plaintext of one datagram from one anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorDatagram {
    pub anchor_id: String,
    pub text: String,
}

pub struct EpochGenerator {
    scenario: Scenario,
    jitter: Option<Normal<f64>>,
    tag_seq: u32,
}

impl EpochGenerator {
    pub fn new(scenario: Scenario) -> Self {
        let jitter = (scenario.ts_noise_ticks > 0.0)
            .then(|| Normal::new(0.0, scenario.ts_noise_ticks).ok())
            .flatten();
        Self { scenario, jitter, tag_seq: 0 }
    }

    fn device_ts(&self, t: f64, range_m: f64, rng: &mut impl Rng) -> u64 {
        let noise = self.jitter.map(|n| n.sample(rng)).unwrap_or(0.0);
        let ticks = (t + range_m / C_M_PER_S) / DW_TICK_S + noise;
        (ticks.max(0.0) as u64) & DW_TS_MASK
    }

    /// Datagrams for one epoch at simulation time `t` (seconds).
    pub fn epoch(&mut self, epoch: u32, t: f64, rng: &mut impl Rng) -> Vec<AnchorDatagram> {
        self.tag_seq = self.tag_seq.wrapping_add(1);
        let drop_rate = self.scenario.drop_rate.clamp(0.0, 1.0);
        let batt = 100u32.saturating_sub(epoch / 600);
        let zone = self
            .scenario
            .zone_id_hex
            .as_deref()
            .map(|z| format!(" zone_id={z}"))
            .unwrap_or_default();

        let mut out = Vec::new();
        for anchor in &self.scenario.anchors {
            let anchor_pos = anchor.position();
            let mut lines = Vec::new();
            for tag in &self.scenario.tags {
                if rng.gen_bool(drop_rate) {
                    continue;
                }
                let p = tag.position_at(t);
                let range = ((p.x - anchor_pos.x).powi(2)
                    + (p.y - anchor_pos.y).powi(2)
                    + (p.z - anchor_pos.z).powi(2))
                .sqrt();
                let ts = self.device_ts(t, range, rng);
                lines.push(format!(
                    "UWB: ver=1 sync={epoch} tag_seq={} batt={batt}% anchor={} tag={} ts={ts}{zone}",
                    self.tag_seq, anchor.id, tag.id
                ));
            }
            if !lines.is_empty() {
                out.push(AnchorDatagram { anchor_id: anchor.id.clone(), text: lines.join("\n") });
            }

            let hb = self.scenario.heartbeat_every;
            if hb > 0 && epoch % hb == 0 {
                out.push(AnchorDatagram {
                    anchor_id: anchor.id.clone(),
                    text: format!("HB: anchor={} up={epoch} batt={batt}%{zone}", anchor.id),
                });
            }
        }
        out
    }
}
