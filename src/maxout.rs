//! Maxout feature-mixing layer with layer normalization.
//!
//! Each output unit takes the maximum over three affine pieces and every
//! output row is layer-normalized in place. The layer keeps its own gradient
//! accumulators so callers can fine-tune it independently of whatever
//! optimizer drives the surrounding pipeline.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{BoundaryError, Result};

/// Affine pieces per maxout unit.
pub const MAXOUT_PIECES: usize = 3;

const NORM_EPS: f32 = 1e-5;

/// Maxout weights plus accumulated gradients.
#[derive(Clone, Serialize, Deserialize)]
pub struct Maxout {
    /// Piece weights: `[pieces, n_out, n_in]`.
    pub w: Array3<f32>,

    /// Piece biases: `[pieces, n_out]`.
    pub b: Array2<f32>,

    /// Accumulated weight gradient, same shape as `w`.
    pub d_w: Array3<f32>,

    /// Accumulated bias gradient, same shape as `b`.
    pub d_b: Array2<f32>,
}

/// Backward-pass state captured by [`Maxout::forward`]. Single-use.
#[derive(Debug)]
pub struct MaxoutContext {
    /// Input batch at forward time: `[n, n_in]`.
    input: Array2<f32>,
    /// Winning piece per (row, unit).
    which: Array2<usize>,
    /// Normalized activations: `[n, n_out]`.
    x_hat: Array2<f32>,
    /// Per-row inverse standard deviation.
    inv_std: Array1<f32>,
}

impl Maxout {
    /// Create a maxout layer with scaled-uniform weight init and zero biases.
    ///
    /// Deterministic for a given seed (xorshift-driven, no RNG state shared
    /// across layers). Fails with a Config error if either width is zero.
    pub fn new(n_in: usize, n_out: usize, seed: u64) -> Result<Self> {
        if n_in == 0 {
            return Err(BoundaryError::config("maxout input width must be positive"));
        }
        if n_out == 0 {
            return Err(BoundaryError::config("maxout output width must be positive"));
        }

        let scale = (2.0 / n_in as f32).sqrt();
        let mut state = seed ^ 0xB0DA_517E;
        let values: Vec<f32> = (0..MAXOUT_PIECES * n_out * n_in)
            .map(|_| {
                state = xorshift64(state);
                let u = (state as f32) / (u64::MAX as f32) * 2.0 - 1.0;
                u * scale
            })
            .collect();
        let w = Array3::from_shape_vec((MAXOUT_PIECES, n_out, n_in), values)
            .map_err(|_| BoundaryError::config("maxout weight shape"))?;

        Ok(Self {
            w,
            b: Array2::zeros((MAXOUT_PIECES, n_out)),
            d_w: Array3::zeros((MAXOUT_PIECES, n_out, n_in)),
            d_b: Array2::zeros((MAXOUT_PIECES, n_out)),
        })
    }

    /// Input width.
    pub fn n_in(&self) -> usize {
        self.w.shape()[2]
    }

    /// Output width.
    pub fn n_out(&self) -> usize {
        self.w.shape()[1]
    }

    /// Trainable parameter count.
    pub fn param_count(&self) -> usize {
        self.w.len() + self.b.len()
    }

    /// Forward pass: `[n, n_in]` → `[n, n_out]`, layer-normalized per row.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, MaxoutContext)> {
        let (n, n_in) = x.dim();
        if n_in != self.n_in() {
            return Err(BoundaryError::shape("maxout input width", self.n_in(), n_in));
        }
        let n_out = self.n_out();

        // Piece 0 seeds the running max; later pieces overwrite where larger.
        let mut pre = x.dot(&self.w.index_axis(Axis(0), 0).t()) + &self.b.index_axis(Axis(0), 0);
        let mut which = Array2::zeros((n, n_out));
        for p in 1..MAXOUT_PIECES {
            let z = x.dot(&self.w.index_axis(Axis(0), p).t()) + &self.b.index_axis(Axis(0), p);
            for i in 0..n {
                for j in 0..n_out {
                    if z[[i, j]] > pre[[i, j]] {
                        pre[[i, j]] = z[[i, j]];
                        which[[i, j]] = p;
                    }
                }
            }
        }

        // Parameterless layer norm per row.
        let mut x_hat = Array2::zeros((n, n_out));
        let mut inv_std = Array1::zeros(n);
        let m = n_out as f32;
        for i in 0..n {
            let row = pre.row(i);
            let mean = row.sum() / m;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / m;
            let istd = 1.0 / (var + NORM_EPS).sqrt();
            for j in 0..n_out {
                x_hat[[i, j]] = (pre[[i, j]] - mean) * istd;
            }
            inv_std[i] = istd;
        }

        let ctx = MaxoutContext {
            input: x.to_owned(),
            which,
            x_hat: x_hat.clone(),
            inv_std,
        };
        Ok((x_hat, ctx))
    }

    /// Backward pass: layer-norm backward, then gradient through each unit's
    /// winning piece only. Accumulates `d_w`/`d_b` and returns the input
    /// gradient `[n, n_in]`.
    pub fn backward(&mut self, d_y: ArrayView2<f32>, ctx: MaxoutContext) -> Result<Array2<f32>> {
        let (n, n_out) = d_y.dim();
        if (n, n_out) != ctx.x_hat.dim() {
            return Err(BoundaryError::shape("maxout gradient rows", ctx.x_hat.nrows(), n));
        }
        if n_out != self.n_out() {
            return Err(BoundaryError::shape("maxout gradient width", self.n_out(), n_out));
        }
        let n_in = self.n_in();
        if ctx.input.ncols() != n_in {
            return Err(BoundaryError::shape("maxout context width", n_in, ctx.input.ncols()));
        }

        // d_pre = istd * (dy - mean(dy) - x_hat * mean(dy * x_hat))
        let m = n_out as f32;
        let mut d_pre = Array2::zeros((n, n_out));
        for i in 0..n {
            let dy = d_y.row(i);
            let h = ctx.x_hat.row(i);
            let mean_dy = dy.sum() / m;
            let mean_dyh = dy.iter().zip(h.iter()).map(|(a, b)| a * b).sum::<f32>() / m;
            for j in 0..n_out {
                d_pre[[i, j]] = ctx.inv_std[i] * (dy[j] - mean_dy - h[j] * mean_dyh);
            }
        }

        let mut d_x = Array2::zeros((n, n_in));
        for i in 0..n {
            for j in 0..n_out {
                let p = ctx.which[[i, j]];
                let g = d_pre[[i, j]];
                if g == 0.0 {
                    continue;
                }
                self.d_b[[p, j]] += g;
                for k in 0..n_in {
                    self.d_w[[p, j, k]] += g * ctx.input[[i, k]];
                    d_x[[i, k]] += g * self.w[[p, j, k]];
                }
            }
        }
        Ok(d_x)
    }

    /// One SGD step from the accumulated gradients, then clear them.
    pub fn apply_gradients(&mut self, lr: f32) {
        self.w = &self.w - &(&self.d_w * lr);
        self.b = &self.b - &(&self.d_b * lr);
        self.zero_gradients();
    }

    /// Clear the accumulated gradients.
    pub fn zero_gradients(&mut self) {
        self.d_w.fill(0.0);
        self.d_b.fill(0.0);
    }
}

fn xorshift64(mut state: u64) -> u64 {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}
