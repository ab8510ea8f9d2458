//! # tdoa
//!
//! Tag position estimation from buffered anchor measurements.
//!
//! For every roster anchor the freshest observation of the tag is taken, the
//! observations are grouped by sync epoch, and the largest group (quorum
//! permitting) is reduced to the centroid of its anchor positions. The
//! centroid stands in for true time-difference multilateration; the solver
//! parameters already carry what that will need (`c_m_per_s`,
//! `ts_unit_scale`, residual limits).

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use uwb_types::Vec3;

use crate::config::{AnchorConfig, BufferParams, SolverParams};
use crate::state::{canonical_id, StateStore};

/// Quorum floor; `min_anchor_count` may raise it, never lower it.
pub const MIN_QUORUM: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveDebug {
    pub mode: &'static str,
    pub sync: i64,
    pub anchor_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagPositionEstimate {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Solve time, Unix seconds
    pub timestamp: f64,
    /// Contributing anchors, lexical order
    pub used_anchors: Vec<String>,
    pub debug: SolveDebug,
}

/// Freshest in-window observation of one tag by one positioned anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorObservation {
    pub anchor_id: String,
    pub position: Vec3,
    pub sync: i64,
    pub ts_recv: f64,
}

/// Effective quorum for the given solver parameters.
pub fn quorum(solver: &SolverParams) -> usize {
    solver.min_anchor_count.max(MIN_QUORUM)
}

/// Roster entries with a usable position, ids canonical, first entry per id wins.
fn positioned_roster(roster: &[AnchorConfig]) -> Vec<(String, Vec3)> {
    let mut seen = HashSet::new();
    roster
        .iter()
        .filter_map(|a| Some((canonical_id(&a.id), a.position()?)))
        .filter(|(id, _)| seen.insert(id.clone()))
        .collect()
}

/// Scan each positioned anchor's buffer newest-first for the tag.
/// Matches without a sync epoch are dropped.
pub async fn collect_observations(
    store: &StateStore,
    roster: &[AnchorConfig],
    tag_id: &str,
    max_age_sec: f64,
    now: f64,
) -> Vec<AnchorObservation> {
    let tag_id = canonical_id(tag_id);
    let mut out = Vec::new();
    for (anchor_id, position) in positioned_roster(roster) {
        let buffer = store.anchor_buffer(&anchor_id).await;
        let latest = buffer
            .iter()
            .rev()
            .find(|m| m.tag_id == tag_id && now - m.ts_recv <= max_age_sec);
        let Some(m) = latest else {
            continue;
        };
        let Some(sync) = m.sync() else {
            continue;
        };
        out.push(AnchorObservation { anchor_id, position, sync, ts_recv: m.ts_recv });
    }
    out
}

/// Largest sync group, ties to the smallest epoch, reduced to its centroid.
pub fn solve_centroid(
    tag_id: &str,
    observations: Vec<AnchorObservation>,
    quorum: usize,
    now: f64,
) -> Option<TagPositionEstimate> {
    let mut by_sync: BTreeMap<i64, Vec<AnchorObservation>> = BTreeMap::new();
    for obs in observations {
        by_sync.entry(obs.sync).or_default().push(obs);
    }

    let (sync, mut group) = by_sync
        .into_iter()
        .min_by_key(|(epoch, group)| (Reverse(group.len()), *epoch))?;
    if group.len() < quorum {
        return None;
    }
    group.sort_by(|a, b| a.anchor_id.cmp(&b.anchor_id));

    let n = group.len() as f64;
    let sum = group.iter().fold(Vec3::default(), |acc, o| {
        Vec3::new(acc.x + o.position.x, acc.y + o.position.y, acc.z + o.position.z)
    });
    let used_anchors: Vec<String> = group.into_iter().map(|o| o.anchor_id).collect();

    Some(TagPositionEstimate {
        tag_id: tag_id.to_string(),
        x: sum.x / n,
        y: sum.y / n,
        z: sum.z / n,
        timestamp: now,
        debug: SolveDebug { mode: "centroid", sync, anchor_count: used_anchors.len() },
        used_anchors,
    })
}

/// Estimate a tag's position from the current buffers, or `None` when the
/// data does not reach quorum.
pub async fn compute_position_for_tag(
    store: &StateStore,
    roster: &[AnchorConfig],
    tag_id: &str,
    buffer: &BufferParams,
    solver: &SolverParams,
    now: f64,
) -> Option<TagPositionEstimate> {
    let observations = collect_observations(store, roster, tag_id, buffer.max_age_sec, now).await;
    if observations.is_empty() {
        return None;
    }
    solve_centroid(&canonical_id(tag_id), observations, quorum(solver), now)
}
