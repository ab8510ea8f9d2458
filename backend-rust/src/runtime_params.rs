//! # runtime_params
//!
//! Throttled cache of the tunable `tdoa.runtime` groups and the anchor roster.
//!
//! Every accessor may trigger a refresh from the shared [`ConfigHandle`], but
//! at most once per refresh interval (one second by default). Accessors hand
//! out clones, so callers can never mutate the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::{
    AnchorConfig, BufferParams, ControllerConfig, FilterParams, SharedConfig, SolverParams,
    ZoneParams,
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

pub type SharedParams = Arc<RuntimeParams>;

#[derive(Debug, Clone)]
struct Snapshot {
    zone: ZoneParams,
    buffer: BufferParams,
    solver: SolverParams,
    filter: FilterParams,
    anchors: Vec<AnchorConfig>,
    loaded_at: Instant,
}

impl Snapshot {
    fn from_config(cfg: &ControllerConfig) -> Self {
        let runtime = &cfg.tdoa.runtime;
        Self {
            zone: ZoneParams::from_runtime(runtime),
            buffer: runtime.buffer.clone(),
            solver: runtime.solver.clone(),
            filter: runtime.filter.clone(),
            anchors: cfg.tdoa.anchors.clone(),
            loaded_at: Instant::now(),
        }
    }
}

pub struct RuntimeParams {
    config: SharedConfig,
    refresh_every: Duration,
    cache: RwLock<Option<Snapshot>>,
    /// Serializes refreshes so concurrent readers do not reload twice.
    refresh_gate: Mutex<()>,
}

impl RuntimeParams {
    pub fn new(config: SharedConfig) -> SharedParams {
        Self::with_refresh_interval(config, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(config: SharedConfig, refresh_every: Duration) -> SharedParams {
        Arc::new(Self {
            config,
            refresh_every,
            cache: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        })
    }

    async fn is_fresh(&self) -> bool {
        match &*self.cache.read().await {
            Some(snap) => snap.loaded_at.elapsed() < self.refresh_every,
            None => false,
        }
    }

    async fn refresh_if_needed(&self) {
        if self.is_fresh().await {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        // Another reader may have refreshed while we waited.
        if self.is_fresh().await {
            return;
        }
        // Reload happens outside the cache lock.
        let cfg = self.config.reload().await;
        let snap = Snapshot::from_config(&cfg);
        debug!("Runtime params refreshed ({} anchors)", snap.anchors.len());
        *self.cache.write().await = Some(snap);
    }

    async fn read<T>(&self, pick: impl FnOnce(&Snapshot) -> T) -> T {
        self.refresh_if_needed().await;
        let cache = self.cache.read().await;
        match cache.as_ref() {
            Some(snap) => pick(snap),
            // Unreachable after a refresh; fall back to defaults rather than panic.
            None => pick(&Snapshot::from_config(&ControllerConfig::default())),
        }
    }

    pub async fn zone(&self) -> ZoneParams {
        self.read(|s| s.zone.clone()).await
    }

    pub async fn buffer(&self) -> BufferParams {
        self.read(|s| s.buffer.clone()).await
    }

    pub async fn solver(&self) -> SolverParams {
        self.read(|s| s.solver.clone()).await
    }

    pub async fn filter(&self) -> FilterParams {
        self.read(|s| s.filter.clone()).await
    }

    pub async fn anchors(&self) -> Vec<AnchorConfig> {
        self.read(|s| s.anchors.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHandle;

    fn config_with_zone(zone: &str, size: usize) -> ControllerConfig {
        let mut cfg = ControllerConfig::default();
        cfg.tdoa.runtime.expected_zone_id_hex = Some(zone.to_string());
        cfg.tdoa.runtime.buffer.per_anchor_size = size;
        cfg
    }

    #[tokio::test]
    async fn refresh_is_throttled() {
        let handle = ConfigHandle::new(config_with_zone("0x5A31", 50));
        let params = RuntimeParams::new(handle.clone());
        assert_eq!(params.zone().await.expected_zone_id_hex.as_deref(), Some("0x5A31"));

        handle.replace(config_with_zone("0x5A32", 10)).await;
        // Within the interval the cached snapshot is served.
        assert_eq!(params.zone().await.expected_zone_id_hex.as_deref(), Some("0x5A31"));
        assert_eq!(params.buffer().await.per_anchor_size, 50);
    }

    #[tokio::test]
    async fn stale_cache_picks_up_changes() {
        let handle = ConfigHandle::new(config_with_zone("0x5A31", 50));
        let params = RuntimeParams::with_refresh_interval(handle.clone(), Duration::ZERO);
        assert_eq!(params.buffer().await.per_anchor_size, 50);

        handle.replace(config_with_zone("0x5A32", 10)).await;
        assert_eq!(params.zone().await.expected_zone_id_hex.as_deref(), Some("0x5A32"));
        assert_eq!(params.buffer().await.per_anchor_size, 10);
    }

    #[tokio::test]
    async fn accessors_return_copies() {
        let handle = ConfigHandle::new(config_with_zone("0x5A31", 50));
        let params = RuntimeParams::new(handle);
        let mut solver = params.solver().await;
        solver.min_anchor_count = 99;
        assert_eq!(params.solver().await.min_anchor_count, 3);
    }
}
