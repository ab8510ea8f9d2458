//! # kalman
//!
//! Per-tag constant-velocity Kalman smoothing of raw position fixes.
//!
//! State `[x, y, vx, vy]`, measurement `[x, y]`. The matrices are small and
//! fixed, so all algebra is done on inline arrays (the 2×2 innovation
//! covariance is inverted with Cramer's rule). Altitude is not filtered.

use std::collections::HashMap;

use crate::config::FilterParams;

/// Initial covariance diagonal: position and velocity effectively unknown.
const INITIAL_COVARIANCE: f64 = 1000.0;
/// Lower bound on the predict step; guards duplicate or reordered timestamps.
const MIN_DT: f64 = 1e-3;

type Mat4 = [[f64; 4]; 4];

fn identity4(scale: f64) -> Mat4 {
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = scale;
    }
    m
}

fn mul4(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            out[i][j] = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose4(a: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            out[i][j] = a[j][i];
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct KalmanFilter2D {
    /// [x, y, vx, vy]
    state: [f64; 4],
    covariance: Mat4,
    last_t: f64,
    /// Process noise added to every diagonal element per predict
    process_noise: f64,
    /// Measurement variance for x and y
    measurement_var: f64,
}

impl KalmanFilter2D {
    /// Seed at the first fix with zero velocity and large uncertainty.
    pub fn new(x0: f64, y0: f64, t0: f64, params: &FilterParams) -> Self {
        Self {
            state: [x0, y0, 0.0, 0.0],
            covariance: identity4(INITIAL_COVARIANCE),
            last_t: t0,
            process_noise: params.process_noise,
            measurement_var: params.pos_sigma_m * params.pos_sigma_m,
        }
    }

    pub fn predict(&mut self, dt: f64) {
        let f: Mat4 = [
            [1.0, 0.0, dt, 0.0],
            [0.0, 1.0, 0.0, dt],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let [x, y, vx, vy] = self.state;
        self.state = [x + dt * vx, y + dt * vy, vx, vy];

        let mut p = mul4(&mul4(&f, &self.covariance), &transpose4(&f));
        for (i, row) in p.iter_mut().enumerate() {
            row[i] += self.process_noise;
        }
        self.covariance = p;
    }

    pub fn update(&mut self, zx: f64, zy: f64) {
        let p = self.covariance;
        let r = self.measurement_var;

        // S = H P Hᵀ + R
        let s = [[p[0][0] + r, p[0][1]], [p[1][0], p[1][1] + r]];
        let det = s[0][0] * s[1][1] - s[0][1] * s[1][0];
        if det.abs() < 1e-12 {
            return;
        }
        let s_inv = [
            [s[1][1] / det, -s[0][1] / det],
            [-s[1][0] / det, s[0][0] / det],
        ];

        // K = P Hᵀ S⁻¹ (4×2)
        let mut k = [[0.0; 2]; 4];
        for (i, row) in k.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = p[i][0] * s_inv[0][j] + p[i][1] * s_inv[1][j];
            }
        }

        let innovation = [zx - self.state[0], zy - self.state[1]];
        for (i, row) in k.iter().enumerate() {
            self.state[i] += row[0] * innovation[0] + row[1] * innovation[1];
        }

        // P = (I - K H) P
        let mut next = p;
        for i in 0..4 {
            for j in 0..4 {
                next[i][j] = p[i][j] - (k[i][0] * p[0][j] + k[i][1] * p[1][j]);
            }
        }
        self.covariance = next;
    }

    /// Advance to `t` and fold in the fix `(zx, zy)`. Returns `[x, y, vx, vy]`.
    /// A non-finite fix leaves the filter untouched.
    pub fn step(&mut self, t: f64, zx: f64, zy: f64) -> [f64; 4] {
        if !(zx.is_finite() && zy.is_finite() && t.is_finite()) {
            return self.state;
        }
        let dt = (t - self.last_t).max(MIN_DT);
        self.predict(dt);
        self.update(zx, zy);
        self.last_t = self.last_t.max(t);
        self.state
    }

    pub fn state(&self) -> [f64; 4] {
        self.state
    }

    pub fn last_update(&self) -> f64 {
        self.last_t
    }

    pub fn position_variance(&self) -> (f64, f64) {
        (self.covariance[0][0], self.covariance[1][1])
    }
}

/// Filtered output for one tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredFix {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

/// One filter per tag, dropped after `tag_max_age_sec` without a fix.
#[derive(Debug, Default)]
pub struct TagFilterBank {
    filters: HashMap<String, KalmanFilter2D>,
}

impl TagFilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove filters whose last fix is older than `max_age` at `now`.
    pub fn evict_stale(&mut self, now: f64, max_age: f64) -> usize {
        let before = self.filters.len();
        self.filters.retain(|_, kf| now - kf.last_update() <= max_age);
        before - self.filters.len()
    }

    /// Fold a fix into the tag's filter. `None` for a non-finite fix, which
    /// neither seeds nor disturbs any filter.
    pub fn update(&mut self, tag_id: &str, t: f64, x: f64, y: f64, params: &FilterParams) -> Option<FilteredFix> {
        if !(x.is_finite() && y.is_finite() && t.is_finite()) {
            return None;
        }
        // A tag silent past its max age is re-seeded rather than extrapolated.
        self.evict_stale(t, params.tag_max_age_sec);
        let kf = self
            .filters
            .entry(tag_id.to_string())
            .or_insert_with(|| KalmanFilter2D::new(x, y, t, params));
        let [x, y, vx, vy] = kf.step(t, x, y);
        Some(FilteredFix { x, y, vx, vy })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.filters.contains_key(tag_id)
    }
}
