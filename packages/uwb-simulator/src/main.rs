//! main.rs — UWB anchor traffic simulator entry point
//!
//! Plays a fixed anchor constellation observing tags that circle the site,
//! emitting sealed `UWB:` and `HB` datagrams to a running controller at a
//! fixed epoch rate. Settings come from an optional TOML file, then CLI flags.

mod scenario;
mod udp_tx;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::time::interval;
use tracing::{debug, info};
use uwb_types::{CipherKey, Framing};

use scenario::{EpochGenerator, Scenario};
use udp_tx::UdpTransmitter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "uwb-sim", about = "Zona UWB anchor traffic simulator")]
struct Args {
    /// Simulator config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Controller UDP address
    #[arg(long)]
    target: Option<String>,
    /// Pre-shared AES key, hex
    #[arg(long)]
    key_hex: Option<String>,
    /// GCM_NONCE_FIRST12 | GCM_NONCE_ZERO | CTR_IV_FIRST16
    #[arg(long)]
    framing: Option<Framing>,
    /// Epochs per second
    #[arg(long)]
    rate_hz: Option<f64>,
    /// Stop after this many epochs (0 = run forever)
    #[arg(long)]
    epochs: Option<u32>,
    /// Zone id stamped on every line
    #[arg(long)]
    zone: Option<String>,
    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SimConfig {
    target: String,
    aes_key_hex: Option<String>,
    framing: Framing,
    rate_hz: f64,
    epochs: u32,
    seed: Option<u64>,
    scenario: Scenario,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:512".to_string(),
            aes_key_hex: None,
            framing: Framing::GcmNonceFirst12,
            rate_hz: 5.0,
            epochs: 0,
            seed: None,
            scenario: Scenario::default(),
        }
    }
}

impl SimConfig {
    fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_args(&mut self, args: Args) {
        if let Some(v) = args.target { self.target = v; }
        if let Some(v) = args.key_hex { self.aes_key_hex = Some(v); }
        if let Some(v) = args.framing { self.framing = v; }
        if let Some(v) = args.rate_hz { self.rate_hz = v; }
        if let Some(v) = args.epochs { self.epochs = v; }
        if let Some(v) = args.zone { self.scenario.zone_id_hex = Some(v); }
        if args.seed.is_some() { self.seed = args.seed; }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_simulator=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    cfg.apply_args(args);

    let Some(key_hex) = cfg.aes_key_hex.as_deref() else {
        bail!("no AES key: set aes_key_hex in the config or pass --key-hex");
    };
    let key = CipherKey::from_hex(key_hex.trim())?;
    if !(cfg.rate_hz.is_finite() && cfg.rate_hz > 0.0) {
        bail!("rate_hz must be positive, got {}", cfg.rate_hz);
    }

    let tx = UdpTransmitter::new(&cfg.target, cfg.framing, key).context("binding UDP sender")?;
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        "📡 UWB Simulator → {} — {} anchors, {} tags, {} @ {} Hz",
        cfg.target,
        cfg.scenario.anchors.len(),
        cfg.scenario.tags.len(),
        cfg.framing,
        cfg.rate_hz
    );

    let epochs = cfg.epochs;
    let mut generator = EpochGenerator::new(cfg.scenario);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / cfg.rate_hz));
    let start = Instant::now();
    let mut epoch: u32 = 0;

    loop {
        ticker.tick().await;
        epoch = epoch.wrapping_add(1);
        let t = start.elapsed().as_secs_f64();

        let datagrams = generator.epoch(epoch, t, &mut rng);
        let mut sent = 0;
        for dg in &datagrams {
            if tx.send(&dg.text, &mut rng) {
                sent += 1;
            } else {
                debug!("epoch {epoch}: datagram from {} not sent", dg.anchor_id);
            }
        }

        if epoch % 20 == 0 {
            info!("⏱ epoch={epoch} t={t:.1}s sent={sent}/{}", datagrams.len());
        }
        if epochs > 0 && epoch >= epochs {
            info!("Done after {epoch} epochs");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_parses() {
        let cfg: SimConfig = toml::from_str(include_str!("../sim.toml")).unwrap();
        assert_eq!(cfg.framing, Framing::GcmNonceFirst12);
        assert_eq!(cfg.scenario.anchors.len(), 4);
        assert_eq!(cfg.scenario.tags[1].period_s, 0.0);
    }

    #[test]
    fn cli_flags_override_file() {
        let mut cfg = SimConfig::default();
        let args = Args::parse_from(["uwb-sim", "--framing", "ctr-iv-first16", "--zone", "0x5A32", "--epochs", "3"]);
        cfg.apply_args(args);
        assert_eq!(cfg.framing, Framing::CtrIvFirst16);
        assert_eq!(cfg.scenario.zone_id_hex.as_deref(), Some("0x5A32"));
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.target, "127.0.0.1:512");
    }
}
