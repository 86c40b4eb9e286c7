//! Windowed token featurization.
//!
//! Each `[2W+1, D]` window becomes a single `3D`-wide feature vector:
//! `[center, mean over all rows, max over all rows]`. Both reductions include
//! the center row, which is always row 0 of the window.
//!
//! The backward pass routes gradient only through the window's center row.
//! The mean and max branches contribute their row-0 shares, but gradient
//! toward the other window rows (real neighbors and padding copies) is
//! dropped instead of being accumulated onto the source tokens. That is the
//! trained behavior of this architecture and changing it would change
//! training dynamics, so it is preserved exactly.

use ndarray::{s, Array2, ArrayView2, ArrayView3};

use crate::error::{BoundaryError, Result};
use crate::flatten::{self, LengthManifest};

/// Backward-pass state captured by [`forward`].
///
/// Single-use: pass it to exactly the [`backward`] call that pairs with the
/// forward call that produced it.
#[derive(Debug)]
pub struct FeaturizeContext {
    /// Window height (`2W + 1`) at forward time.
    window_rows: usize,
    /// Winning row per (token, feature) in the max reduction. First
    /// occurrence wins ties, so a center that ties its own padding keeps
    /// row 0.
    argmax: Array2<usize>,
}

/// Featurize a batch of windows: `[n, 2W+1, D]` → `[n, 3D]`.
pub fn forward(windows: &ArrayView3<f32>) -> (Array2<f32>, FeaturizeContext) {
    let (n, rows, dim) = windows.dim();
    let mut features = Array2::zeros((n, 3 * dim));
    let mut argmax = Array2::zeros((n, dim));
    let inv_rows = 1.0 / rows as f32;

    for t in 0..n {
        let win = windows.slice(s![t, .., ..]);
        for d in 0..dim {
            let mut best_row = 0;
            let mut best = win[[0, d]];
            let mut sum = 0.0;
            for r in 0..rows {
                let v = win[[r, d]];
                sum += v;
                if v > best {
                    best = v;
                    best_row = r;
                }
            }
            features[[t, d]] = win[[0, d]];
            features[[t, dim + d]] = sum * inv_rows;
            features[[t, 2 * dim + d]] = best;
            argmax[[t, d]] = best_row;
        }
    }

    let ctx = FeaturizeContext {
        window_rows: rows,
        argmax,
    };
    (features, ctx)
}

/// Route a `[n, 3D]` feature gradient back to the ragged per-document token
/// gradients.
///
/// Only the window's row 0 receives gradient: the self block directly, plus
/// the mean block's `1/(2W+1)` share, plus the max block wherever the center
/// row held the maximum. The result is split per document by the manifest
/// captured when the windows were built.
pub fn backward(
    d_features: &ArrayView2<f32>,
    ctx: &FeaturizeContext,
    manifest: &LengthManifest,
) -> Result<Vec<Array2<f32>>> {
    let n = d_features.nrows();
    if n != manifest.total() {
        return Err(BoundaryError::shape("feature gradient rows", manifest.total(), n));
    }
    let dim = manifest.width();
    if d_features.ncols() != 3 * dim {
        return Err(BoundaryError::shape(
            "feature gradient width",
            3 * dim,
            d_features.ncols(),
        ));
    }
    if ctx.argmax.nrows() != n {
        return Err(BoundaryError::shape("featurize context rows", n, ctx.argmax.nrows()));
    }
    if ctx.argmax.ncols() != dim {
        return Err(BoundaryError::shape("featurize context width", dim, ctx.argmax.ncols()));
    }

    let inv_rows = 1.0 / ctx.window_rows as f32;
    let mut d_tokens = Array2::zeros((n, dim));
    for t in 0..n {
        for d in 0..dim {
            let mut g = d_features[[t, d]] + d_features[[t, dim + d]] * inv_rows;
            if ctx.argmax[[t, d]] == 0 {
                g += d_features[[t, 2 * dim + d]];
            }
            d_tokens[[t, d]] = g;
        }
    }
    flatten::split(d_tokens.view(), manifest)
}
