//! Sliding-window neighborhood construction.
//!
//! For every token in a batch the constructor builds a fixed-height window of
//! `2W + 1` rows: the token itself at row 0, then its real neighbors within
//! `W` positions (left side first, in document order), then copies of the
//! token's own vector until the window is full. Clipping at document
//! boundaries pads with the center rather than wrapping or zero-filling, so
//! no neighbor information is fabricated from out-of-bounds positions.

use ndarray::{s, Array2, Array3};
use rayon::prelude::*;

use crate::error::{BoundaryError, Result};
use crate::flatten::LengthManifest;

/// Build one `[2W+1, D]` window per token across the whole batch.
///
/// Output is `[n_tokens, 2W+1, D]` in document-major, position-minor order,
/// paired with the manifest of per-document token counts needed to re-rag the
/// matching backward pass. Fails with a Shape error if the documents disagree
/// on vector dimensionality.
pub fn build_windows(
    docs: &[Array2<f32>],
    half_width: usize,
) -> Result<(Array3<f32>, LengthManifest)> {
    let dim = docs.first().map(|d| d.ncols()).unwrap_or(0);
    let mut lengths = Vec::with_capacity(docs.len());
    let mut total = 0;
    for doc in docs {
        if doc.ncols() != dim {
            return Err(BoundaryError::shape("token dimensionality", dim, doc.ncols()));
        }
        lengths.push(doc.nrows());
        total += doc.nrows();
    }

    let rows = 2 * half_width + 1;

    // Windows are independent per token, so documents build in parallel.
    let per_doc: Vec<Array3<f32>> = docs
        .par_iter()
        .map(|doc| doc_windows(doc, half_width))
        .collect();

    let mut windows = Array3::zeros((total, rows, dim));
    let mut offset = 0;
    for block in &per_doc {
        let n = block.shape()[0];
        windows.slice_mut(s![offset..offset + n, .., ..]).assign(block);
        offset += n;
    }
    Ok((windows, LengthManifest::new(lengths, dim)))
}

/// Windows for a single document: `[len, 2W+1, D]`.
fn doc_windows(doc: &Array2<f32>, half_width: usize) -> Array3<f32> {
    let len = doc.nrows();
    let dim = doc.ncols();
    let rows = 2 * half_width + 1;
    let mut out = Array3::zeros((len, rows, dim));

    for i in 0..len {
        let center = doc.row(i);
        out.slice_mut(s![i, 0, ..]).assign(&center);

        // Clip the window at the document boundaries.
        let left = half_width.min(i);
        let right = half_width.min(len - 1 - i);

        let mut row = 1;
        for k in (i - left)..=(i + right) {
            if k != i {
                out.slice_mut(s![i, row, ..]).assign(&doc.row(k));
                row += 1;
            }
        }
        // Remaining slots repeat the center vector.
        for r in row..rows {
            out.slice_mut(s![i, r, ..]).assign(&center);
        }
    }
    out
}
