//! Soft-DTW forward cost and backward alignment, ported from
//! `compute_softdtw_matrix_vectorized` / `extract_soft_alignment_vectorized`.
//!
//! This is the plain numerical contract only: no autograd. Whatever board
//! node invokes a model carries its own gradient machinery; this crate just
//! has to reproduce the forward cost and the backward alignment matrix
//! exactly, so that a future autograd layer wrapping these numbers would
//! observe the same values the reference implementation does.

/// A row-major, batch-first 3D tensor: `data[b * dim1 * dim2 + i * dim2 + j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor3 {
    pub batch: usize,
    pub dim1: usize,
    pub dim2: usize,
    pub data: Vec<f32>,
}

impl Tensor3 {
    pub fn zeros(batch: usize, dim1: usize, dim2: usize) -> Self {
        Self {
            batch,
            dim1,
            dim2,
            data: vec![0.0; batch * dim1 * dim2],
        }
    }

    pub fn filled(batch: usize, dim1: usize, dim2: usize, value: f32) -> Self {
        Self {
            batch,
            dim1,
            dim2,
            data: vec![value; batch * dim1 * dim2],
        }
    }

    #[inline]
    fn idx(&self, b: usize, i: usize, j: usize) -> usize {
        (b * self.dim1 + i) * self.dim2 + j
    }

    #[inline]
    pub fn get(&self, b: usize, i: usize, j: usize) -> f32 {
        self.data[self.idx(b, i, j)]
    }

    #[inline]
    pub fn set(&mut self, b: usize, i: usize, j: usize, value: f32) {
        let idx = self.idx(b, i, j);
        self.data[idx] = value;
    }
}

/// Clamps `exp(x)` to avoid NaN/inf blowups when `x` is very large in
/// magnitude, matching the reference implementation's `clampExp` guard.
fn clamp_exp(x: f32) -> f32 {
    x.clamp(-60.0, 60.0).exp()
}

/// Numerically stable `-gamma * log(exp(-a/gamma) + exp(-b/gamma) + exp(-c/gamma))`.
fn soft_min(a: f32, b: f32, c: f32, gamma: f32) -> f32 {
    let m = a.min(b).min(c);
    if !m.is_finite() {
        return f32::INFINITY;
    }
    let sum = clamp_exp(-(a - m) / gamma) + clamp_exp(-(b - m) / gamma) + clamp_exp(-(c - m) / gamma);
    m - gamma * sum.ln()
}

/// Builds the extended `R` matrix of shape `[B, N+2, M+2]` from a pairwise
/// distance tensor `D` of shape `[B, N, M]`. The valid DP cells are
/// `R[b][1..=N][1..=M]`; the cost of sequence pair `b` is `R[b][N][M]`.
pub fn softdtw_forward(distances: &Tensor3, gamma: f32) -> Tensor3 {
    assert!(gamma > 0.0, "gamma must be positive");
    let b_sz = distances.batch;
    let n = distances.dim1;
    let m = distances.dim2;
    let mut r = Tensor3::filled(b_sz, n + 2, m + 2, f32::INFINITY);

    for b in 0..b_sz {
        r.set(b, 0, 0, 0.0);
        // Diagonal-by-diagonal sweep: cell (i, j) depends only on cells at
        // the previous diagonal, so this order is valid even though a plain
        // row-major sweep would also satisfy the dependency.
        for diag in 2..=(n + m) {
            for i in 1..=n.min(diag - 1) {
                let j = diag - i;
                if j < 1 || j > m {
                    continue;
                }
                let d_ij = distances.get(b, i - 1, j - 1);
                let min_prev = soft_min(
                    r.get(b, i - 1, j - 1),
                    r.get(b, i - 1, j),
                    r.get(b, i, j - 1),
                    gamma,
                );
                r.set(b, i, j, d_ij + min_prev);
            }
        }
    }
    r
}

/// Cost vector (length `B`) extracted from a forward `R` matrix of shape
/// `[B, N+2, M+2]` for sequences of length `(n, m)`.
pub fn softdtw_cost(r: &Tensor3, n: usize, m: usize) -> Vec<f32> {
    (0..r.batch).map(|b| r.get(b, n, m)).collect()
}

/// Backward alignment matrix `E` of shape `[B, N, M]`, ported from
/// `extract_soft_alignment_vectorized`. Sweeps diagonals in reverse from
/// the seed at `(N, M)`, then multiplies by `exp(-R/gamma)` and normalizes
/// each batch slice by its sum so the returned alignment is a proper
/// distribution over the DTW path.
pub fn softdtw_backward(r: &Tensor3, distances: &Tensor3, gamma: f32) -> Tensor3 {
    assert!(gamma > 0.0, "gamma must be positive");
    let b_sz = r.batch;
    let n = distances.dim1;
    let m = distances.dim2;
    let mut e = Tensor3::zeros(b_sz, n + 2, m + 2);

    for b in 0..b_sz {
        e.set(b, n, m, 1.0);
        for diag in (2..=(n + m)).rev() {
            for i in 1..=n.min(diag - 1) {
                let j = diag - i;
                if j < 1 || j > m || (i == n && j == m) {
                    continue;
                }
                let here = r.get(b, i, j);
                let w_down = clamp_exp(-(r.get(b, i + 1, j) - here) / gamma);
                let w_right = clamp_exp(-(r.get(b, i, j + 1) - here) / gamma);
                let w_diag = clamp_exp(-(r.get(b, i + 1, j + 1) - here) / gamma);
                let value = w_down * e.get(b, i + 1, j)
                    + w_right * e.get(b, i, j + 1)
                    + w_diag * e.get(b, i + 1, j + 1);
                e.set(b, i, j, value);
            }
        }
    }

    let mut out = Tensor3::zeros(b_sz, n, m);
    for b in 0..b_sz {
        let mut weighted = vec![0.0f32; n * m];
        let mut total = 0.0f32;
        for i in 1..=n {
            for j in 1..=m {
                let factor = clamp_exp(-r.get(b, i, j) / gamma);
                let val = e.get(b, i, j) * factor;
                weighted[(i - 1) * m + (j - 1)] = val;
                total += val;
            }
        }
        let denom = total + 1e-9;
        for i in 0..n {
            for j in 0..m {
                out.set(b, i, j, weighted[i * m + j] / denom);
            }
        }
    }
    out
}
