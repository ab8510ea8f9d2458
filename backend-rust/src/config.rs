//! # config
//!
//! Controller configuration: a TOML file plus a few environment overrides.
//!
//! The parsed file lives behind a [`ConfigHandle`] that `main` builds once
//! and passes by `Arc` to every component that needs it. The handle can
//! re-read the file on demand; a reload that fails keeps the last good
//! configuration.
//!
//! ```toml
//! [crypto]
//! aes_key_hex = "00112233445566778899AABBCCDDEEFF"
//!
//! [network]
//! udp_port = 512
//!
//! [[tdoa.anchors]]
//! id = "0x04000020"
//! position = { x = 0.0, y = 0.0, z = 2.5 }
//!
//! [tdoa.runtime]
//! expected_zone_id_hex = "0x5A31"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uwb_types::{CipherKey, KeyError, Vec3};

pub const DEFAULT_CONFIG_PATH: &str = "zona.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing required config key `{0}`")]
    Missing(&'static str),
    #[error("invalid crypto.aes_key_hex: {0}")]
    Key(#[from] KeyError),
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tdoa: TdoaConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Pre-shared AES key, hex encoded. Required at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aes_key_hex: Option<String>,
    #[serde(default = "default_true")]
    pub enable_gcm_first_nonce: bool,
    #[serde(default = "default_true")]
    pub enable_gcm_zero_nonce: bool,
    #[serde(default = "default_true")]
    pub enable_ctr_first_iv: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            aes_key_hex: None,
            enable_gcm_first_nonce: true,
            enable_gcm_zero_nonce: true,
            enable_ctr_first_iv: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_udp_host")]
    pub udp_host: String,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Downstream position sink; forwarding is enabled only when both are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_port: Option<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_host: default_udp_host(),
            udp_port: default_udp_port(),
            sink_host: None,
            sink_port: None,
        }
    }
}

impl NetworkConfig {
    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.udp_host, self.udp_port)
    }

    pub fn sink_addr(&self) -> Option<String> {
        match (&self.sink_host, self.sink_port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_udp_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { host: default_udp_host(), port: default_http_port() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TdoaConfig {
    #[serde(default)]
    pub anchors: Vec<AnchorConfig>,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// One roster entry. Entries without a complete position are ignored by the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<AnchorPosition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorPosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AnchorConfig {
    pub fn new(id: &str, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.to_string(),
            position: Some(AnchorPosition { x: Some(x), y: Some(y), z: Some(z) }),
        }
    }

    /// Position if the entry is usable: non-empty id and finite x/y/z.
    pub fn position(&self) -> Option<Vec3> {
        if self.id.trim().is_empty() {
            return None;
        }
        let p = self.position?;
        let v = Vec3::new(p.x?, p.y?, p.z?);
        v.is_finite().then_some(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ── tdoa.runtime ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_zone_id_hex: Option<String>,
    #[serde(default)]
    pub buffer: BufferParams,
    #[serde(default)]
    pub solver: SolverParams,
    #[serde(default)]
    pub filter: FilterParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneParams {
    /// `None` admits every datagram
    pub expected_zone_id_hex: Option<String>,
}

impl ZoneParams {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        // A blank value in the file means "no zone filter".
        let expected = runtime
            .expected_zone_id_hex
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self { expected_zone_id_hex: expected }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferParams {
    pub per_anchor_size: usize,
    pub max_age_sec: f64,
    pub snapshots_per_anchor: usize,
}

impl Default for BufferParams {
    fn default() -> Self {
        Self { per_anchor_size: 50, max_age_sec: 2.0, snapshots_per_anchor: 5 }
    }
}

/// Which position goes to the downstream sink. Consumers get the unsmoothed
/// fix unless `filtered` is asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    Filtered,
    #[default]
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Propagation speed for true multilateration (m/s)
    pub c_m_per_s: f64,
    pub ts_unit_scale: f64,
    /// May raise the quorum above the fixed minimum of 3, never lower it
    pub min_anchor_count: usize,
    pub min_good_anchors: usize,
    pub max_iterations: u32,
    pub stop_threshold: f64,
    pub max_residual_m: f64,
    pub anchor_outlier_reject_pct: f64,
    pub reference_anchor: String,
    pub use_lm_solver: bool,
    pub enable_geometry_checks: bool,
    pub initial_guess: Vec3,
    pub debug_output: bool,
    pub forward_mode: ForwardMode,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            c_m_per_s: 299_792_458.0,
            ts_unit_scale: 1.0,
            min_anchor_count: 3,
            min_good_anchors: 3,
            max_iterations: 20,
            stop_threshold: 1e-4,
            max_residual_m: 2.0,
            anchor_outlier_reject_pct: 0.2,
            reference_anchor: "closest".to_string(),
            use_lm_solver: true,
            enable_geometry_checks: true,
            initial_guess: Vec3::default(),
            debug_output: false,
            forward_mode: ForwardMode::Raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Measurement noise σ (m); R = σ²·I
    pub pos_sigma_m: f64,
    /// Q = process_noise·I per predict step
    pub process_noise: f64,
    /// Kalman state of a tag silent for longer than this is dropped
    pub tag_max_age_sec: f64,
    pub max_jump_m: f64,
    pub velocity_damping: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            pos_sigma_m: 0.5,
            process_noise: 0.1,
            tag_max_age_sec: 2.0,
            max_jump_m: 5.0,
            velocity_damping: 0.8,
        }
    }
}

// ── permissions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub admin_editable: Vec<String>,
    #[serde(default)]
    pub root_only: Vec<String>,
}

fn default_true() -> bool { true }
fn default_udp_host() -> String { "0.0.0.0".to_string() }
fn default_udp_port() -> u16 { 512 }
fn default_http_port() -> u16 { 51200 }

// ── Parsing & validation ──────────────────────────────────────────────────────

impl ControllerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    async fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// `ZONA_UDP_HOST`, `ZONA_UDP_PORT`, `ZONA_HTTP_PORT`, `ZONA_AES_KEY_HEX`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ZONA_UDP_HOST") {
            self.network.udp_host = host;
        }
        if let Some(port) = std::env::var("ZONA_UDP_PORT").ok().and_then(|v| v.parse().ok()) {
            self.network.udp_port = port;
        }
        if let Some(port) = std::env::var("ZONA_HTTP_PORT").ok().and_then(|v| v.parse().ok()) {
            self.http.port = port;
        }
        if let Ok(key) = std::env::var("ZONA_AES_KEY_HEX") {
            self.crypto.aes_key_hex = Some(key);
        }
    }

    /// The pre-shared key. Absence is fatal for the ingestion worker.
    pub fn cipher_key(&self) -> Result<CipherKey, ConfigError> {
        let hex = self
            .crypto
            .aes_key_hex
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("crypto.aes_key_hex"))?;
        Ok(CipherKey::from_hex(hex)?)
    }

    /// Copy safe to hand to readers: the AES key is masked.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.crypto.aes_key_hex.is_some() {
            cfg.crypto.aes_key_hex = Some("***".to_string());
        }
        cfg
    }
}

// ── Shared handle ─────────────────────────────────────────────────────────────

pub type SharedConfig = Arc<ConfigHandle>;

/// Explicitly constructed configuration source shared by all components.
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<ControllerConfig>,
}

impl ConfigHandle {
    /// In-memory handle with no backing file; `reload` is a no-op.
    pub fn new(config: ControllerConfig) -> SharedConfig {
        Arc::new(Self { path: None, current: RwLock::new(config) })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<SharedConfig, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let cfg = ControllerConfig::read_file(&path).await?;
        info!(
            "Loaded {} ({} anchors, zone filter: {})",
            path.display(),
            cfg.tdoa.anchors.len(),
            cfg.tdoa.runtime.expected_zone_id_hex.as_deref().unwrap_or("off")
        );
        Ok(Arc::new(Self { path: Some(path), current: RwLock::new(cfg) }))
    }

    pub async fn snapshot(&self) -> ControllerConfig {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, config: ControllerConfig) {
        *self.current.write().await = config;
    }

    /// Re-read the backing file and return the configuration now in effect.
    pub async fn reload(&self) -> ControllerConfig {
        if let Some(path) = &self.path {
            // File I/O happens before the write lock is taken.
            match ControllerConfig::read_file(path).await {
                Ok(cfg) => {
                    let mut current = self.current.write().await;
                    *current = cfg;
                    return current.clone();
                }
                Err(e) => warn!("Config reload failed, keeping previous: {e}"),
            }
        }
        self.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [crypto]
        aes_key_hex = "00112233445566778899AABBCCDDEEFF"
        enable_ctr_first_iv = false

        [network]
        udp_port = 5120
        sink_host = "10.0.0.5"
        sink_port = 9000

        [[tdoa.anchors]]
        id = "0x04000020"
        position = { x = 1.0, y = 2.0, z = 3.0 }

        [[tdoa.anchors]]
        id = "0x04000021"
        position = { x = 1.0, y = 2.0 }

        [tdoa.runtime]
        expected_zone_id_hex = "0x5A31"

        [tdoa.runtime.buffer]
        per_anchor_size = 20

        [tdoa.runtime.solver]
        forward_mode = "filtered"

        [permissions]
        admin_editable = ["tdoa.*", "network"]
        root_only = ["crypto.*"]
    "#;

    #[test]
    fn parses_sections_with_defaults() {
        let cfg = ControllerConfig::from_toml_str(SAMPLE).unwrap();
        assert!(cfg.crypto.enable_gcm_first_nonce);
        assert!(!cfg.crypto.enable_ctr_first_iv);
        assert_eq!(cfg.network.udp_host, "0.0.0.0");
        assert_eq!(cfg.network.udp_port, 5120);
        assert_eq!(cfg.network.sink_addr().as_deref(), Some("10.0.0.5:9000"));
        assert_eq!(cfg.http.port, 51200);
        assert_eq!(cfg.tdoa.runtime.buffer.per_anchor_size, 20);
        assert_eq!(cfg.tdoa.runtime.buffer.max_age_sec, 2.0);
        assert_eq!(cfg.tdoa.runtime.solver.forward_mode, ForwardMode::Filtered);
        assert_eq!(cfg.tdoa.runtime.solver.max_iterations, 20);
        assert_eq!(cfg.tdoa.runtime.filter.pos_sigma_m, 0.5);
        assert_eq!(cfg.permissions.root_only, vec!["crypto.*".to_string()]);
    }

    #[test]
    fn incomplete_anchor_positions_are_unusable() {
        let cfg = ControllerConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.tdoa.anchors[0].position(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(cfg.tdoa.anchors[1].position(), None);
        assert_eq!(AnchorConfig::new("", 0.0, 0.0, 0.0).position(), None);
    }

    #[test]
    fn missing_key_is_fatal() {
        let cfg = ControllerConfig::default();
        assert!(matches!(cfg.cipher_key(), Err(ConfigError::Missing("crypto.aes_key_hex"))));

        let mut cfg = ControllerConfig::default();
        cfg.crypto.aes_key_hex = Some("abcd".into());
        assert!(matches!(cfg.cipher_key(), Err(ConfigError::Key(KeyError::Length(2)))));
    }

    #[test]
    fn redacted_masks_key() {
        let cfg = ControllerConfig::from_toml_str(SAMPLE).unwrap();
        assert!(cfg.cipher_key().is_ok());
        assert_eq!(cfg.redacted().crypto.aes_key_hex.as_deref(), Some("***"));
        assert_eq!(ControllerConfig::default().redacted().crypto.aes_key_hex, None);
    }

    #[test]
    fn blank_zone_disables_filter() {
        let mut runtime = RuntimeConfig::default();
        runtime.expected_zone_id_hex = Some("  ".into());
        assert_eq!(ZoneParams::from_runtime(&runtime).expected_zone_id_hex, None);
        runtime.expected_zone_id_hex = Some("0x5A31".into());
        assert_eq!(ZoneParams::from_runtime(&runtime).expected_zone_id_hex.as_deref(), Some("0x5A31"));
    }

    #[test]
    fn shipped_config_is_valid() {
        let cfg = ControllerConfig::from_toml_str(include_str!("../../zona.toml")).unwrap();
        assert!(cfg.cipher_key().is_ok());
        assert_eq!(cfg.tdoa.anchors.len(), 4);
        assert!(cfg.tdoa.anchors.iter().all(|a| a.position().is_some()));
        assert_eq!(cfg.network.sink_addr(), None);
    }

    #[test]
    fn forwards_raw_fix_unless_filtered_is_asked_for() {
        let cfg = ControllerConfig::from_toml_str("[tdoa.runtime.solver]\nmin_anchor_count = 3\n").unwrap();
        assert_eq!(cfg.tdoa.runtime.solver.forward_mode, ForwardMode::Raw);
        assert_eq!(SolverParams::default().forward_mode, ForwardMode::Raw);
    }

    #[tokio::test]
    async fn in_memory_reload_keeps_current() {
        let handle = ConfigHandle::new(ControllerConfig::default());
        let mut cfg = ControllerConfig::default();
        cfg.network.udp_port = 9999;
        handle.replace(cfg).await;
        assert_eq!(handle.reload().await.network.udp_port, 9999);
    }
}
