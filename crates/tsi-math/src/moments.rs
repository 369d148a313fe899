//! Online (Welford) and rolling-window moment trackers.
//!
//! Ported from `statistics_space_t` / `statistics_space_n_t`: the infinite
//! variant is a classic Welford accumulator; the windowed variant keeps a
//! circular buffer of the last N values plus a sorted multiset of those
//! values so min/max stay cheap to query.

use std::collections::VecDeque;

/// Online mean/variance/min/max over an unbounded stream, updated in O(1)
/// using Welford's algorithm.
#[derive(Debug, Clone)]
pub struct RollingMoments {
    count: u64,
    max: f64,
    min: f64,
    mean: f64,
    /// Running sum of squared deviations from the mean (Welford's `M2`).
    m2: f64,
}

impl RollingMoments {
    pub fn new() -> Self {
        Self {
            count: 0,
            max: f64::MIN,
            min: f64::MAX,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn update(&mut self, x: f64) {
        self.count += 1;
        self.max = self.max.max(x);
        self.min = self.min.min(x);
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (Bessel-corrected); 0 until at least two samples.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// z-score of `x` against the stream seen so far; 0 when the stream has
    /// no spread yet (std == 0).
    pub fn normalize(&self, x: f64) -> f64 {
        let std = self.stddev();
        if std == 0.0 {
            0.0
        } else {
            (x - self.mean) / std
        }
    }
}

impl Default for RollingMoments {
    fn default() -> Self {
        Self::new()
    }
}

/// Moments over the trailing `window_size` values only. Variance is
/// recomputed from the buffer on every call rather than tracked
/// incrementally, matching the reference implementation's O(N)-per-update
/// contract in exchange for numerical robustness to the sliding window.
#[derive(Debug, Clone)]
pub struct WindowedMoments {
    window_size: usize,
    window: VecDeque<f64>,
    /// Kept sorted ascending; plays the role of the reference's
    /// `std::multiset<double>` for O(log N) min/max maintenance.
    sorted: Vec<f64>,
    sum: f64,
    count_seen: u64,
}

impl WindowedMoments {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window_size must be positive");
        Self {
            window_size,
            window: VecDeque::with_capacity(window_size),
            sorted: Vec::with_capacity(window_size),
            sum: 0.0,
            count_seen: 0,
        }
    }

    pub fn update(&mut self, x: f64) {
        self.count_seen += 1;
        self.window.push_back(x);
        let idx = self.sorted.partition_point(|&v| v < x);
        self.sorted.insert(idx, x);
        self.sum += x;

        if self.window.len() > self.window_size {
            let evicted = self.window.pop_front().expect("window non-empty");
            self.sum -= evicted;
            let idx = self
                .sorted
                .binary_search_by(|v| v.partial_cmp(&evicted).expect("no NaNs"))
                .expect("evicted value must be present");
            self.sorted.remove(idx);
        }
    }

    pub fn ready(&self) -> bool {
        self.window.len() >= self.window_size
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    /// Sample variance over the current window, recomputed from scratch.
    pub fn variance(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_dev: f64 = self.window.iter().map(|&v| (v - mean).powi(2)).sum();
        sum_sq_dev / (n - 1) as f64
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn max(&self) -> f64 {
        *self.sorted.last().unwrap_or(&f64::MIN)
    }

    pub fn min(&self) -> f64 {
        *self.sorted.first().unwrap_or(&f64::MAX)
    }

    pub fn count(&self) -> u64 {
        self.count_seen
    }

    pub fn normalize(&self, x: f64) -> f64 {
        let std = self.stddev();
        if std == 0.0 {
            0.0
        } else {
            (x - self.mean()) / std
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_closed_form_variance() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut m = RollingMoments::new();
        for &x in &data {
            m.update(x);
        }
        let n = data.len() as f64;
        let mean: f64 = data.iter().sum::<f64>() / n;
        let sample_var: f64 = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!((m.variance() - sample_var).abs() < 1e-9);
        assert_eq!(m.max(), 9.0);
        assert_eq!(m.min(), 2.0);
        assert_eq!(m.count(), 8);
    }

    #[test]
    fn normalize_is_zero_for_constant_stream() {
        let mut m = RollingMoments::new();
        m.update(5.0);
        m.update(5.0);
        assert_eq!(m.normalize(5.0), 0.0);
    }

    #[test]
    fn windowed_moments_tracks_trailing_window_only() {
        let mut w = WindowedMoments::new(3);
        for x in [1.0, 2.0, 3.0] {
            w.update(x);
        }
        assert!(w.ready());
        assert_eq!(w.max(), 3.0);
        assert_eq!(w.min(), 1.0);
        w.update(100.0);
        // window is now [2, 3, 100]; the evicted 1.0 must no longer affect min.
        assert_eq!(w.min(), 2.0);
        assert_eq!(w.max(), 100.0);
        assert_eq!(w.count(), 4);
    }

    #[test]
    fn windowed_not_ready_until_filled() {
        let mut w = WindowedMoments::new(5);
        w.update(1.0);
        w.update(2.0);
        assert!(!w.ready());
    }
}
