//! Ragged/flat conversion.
//!
//! A batch of variable-length per-document row matrices is concatenated into
//! one contiguous matrix, and a [`LengthManifest`] records where each document
//! ends so the flat form can be split back exactly. Flatten-then-split is an
//! exact inverse for any batch, including empty documents and empty batches.

use ndarray::{s, Array2, ArrayView2};

use crate::error::{BoundaryError, Result};

/// Per-document row counts captured when a ragged batch is flattened.
///
/// A manifest is created fresh by each [`flatten`] call and moved into the
/// caller's context, so overlapping forward/backward pairs for different
/// batches never share one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LengthManifest {
    lengths: Vec<usize>,
    width: usize,
}

impl LengthManifest {
    /// Build a manifest from explicit per-document lengths and a row width.
    pub fn new(lengths: Vec<usize>, width: usize) -> Self {
        Self { lengths, width }
    }

    /// Per-document row counts, in batch order.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Row width shared by every document in the batch.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of documents.
    pub fn n_docs(&self) -> usize {
        self.lengths.len()
    }

    /// Total flat row count. Always equals the sum of the lengths.
    pub fn total(&self) -> usize {
        self.lengths.iter().sum()
    }
}

/// Concatenate per-document row matrices into one flat matrix, document-major
/// with row order preserved inside each document.
///
/// Fails with a Shape error if the documents disagree on column width.
pub fn flatten(docs: &[Array2<f32>]) -> Result<(Array2<f32>, LengthManifest)> {
    let width = docs.first().map(|d| d.ncols()).unwrap_or(0);
    let mut lengths = Vec::with_capacity(docs.len());
    let mut total = 0;
    for doc in docs {
        if doc.ncols() != width {
            return Err(BoundaryError::shape("flatten input width", width, doc.ncols()));
        }
        lengths.push(doc.nrows());
        total += doc.nrows();
    }

    let mut flat = Array2::zeros((total, width));
    let mut offset = 0;
    for doc in docs {
        flat.slice_mut(s![offset..offset + doc.nrows(), ..]).assign(doc);
        offset += doc.nrows();
    }
    Ok((flat, LengthManifest::new(lengths, width)))
}

/// Split a flat matrix back into per-document matrices using a manifest.
///
/// Exact inverse of [`flatten`] for the manifest it produced. Fails with a
/// Shape error if the flat row count or width disagrees with the manifest.
pub fn split(flat: ArrayView2<f32>, manifest: &LengthManifest) -> Result<Vec<Array2<f32>>> {
    let total = manifest.total();
    if flat.nrows() != total {
        return Err(BoundaryError::shape("split input rows", total, flat.nrows()));
    }
    if flat.ncols() != manifest.width() {
        return Err(BoundaryError::shape(
            "split input width",
            manifest.width(),
            flat.ncols(),
        ));
    }

    let mut docs = Vec::with_capacity(manifest.n_docs());
    let mut offset = 0;
    for &len in manifest.lengths() {
        docs.push(flat.slice(s![offset..offset + len, ..]).to_owned());
        offset += len;
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_flatten_document_major_order() {
        let docs = vec![
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            array![[7.0, 8.0]],
        ];
        let (flat, manifest) = flatten(&docs).unwrap();
        assert_eq!(flat.dim(), (4, 2));
        assert_eq!(manifest.lengths(), &[3, 1]);
        assert_eq!(flat[[0, 0]], 1.0);
        assert_eq!(flat[[2, 1]], 6.0);
        assert_eq!(flat[[3, 0]], 7.0);
    }

    #[test]
    fn test_manifest_sum_equals_flat_rows() {
        let docs = vec![
            Array2::<f32>::zeros((5, 3)),
            Array2::<f32>::zeros((0, 3)),
            Array2::<f32>::zeros((2, 3)),
        ];
        let (flat, manifest) = flatten(&docs).unwrap();
        assert_eq!(manifest.total(), flat.nrows());
        assert_eq!(manifest.total(), 7);
    }

    #[test]
    fn test_round_trip_is_exact() {
        let docs = vec![
            array![[1.0_f32, -1.0], [2.0, -2.0]],
            Array2::<f32>::zeros((0, 2)),
            array![[9.0, 9.5], [8.0, 8.5], [7.0, 7.5]],
        ];
        let (flat, manifest) = flatten(&docs).unwrap();
        let back = split(flat.view(), &manifest).unwrap();
        assert_eq!(back.len(), docs.len());
        for (orig, rebuilt) in docs.iter().zip(back.iter()) {
            assert_eq!(orig, rebuilt);
        }
    }

    #[test]
    fn test_split_scores_by_manifest() {
        // Manifest [3, 1] over 4 per-token scores: first 3, then last 1.
        let manifest = LengthManifest::new(vec![3, 1], 1);
        let flat = array![[0.1_f32], [0.2], [0.3], [0.4]];
        let docs = split(flat.view(), &manifest).unwrap();
        assert_eq!(docs[0].column(0).to_vec(), vec![0.1, 0.2, 0.3]);
        assert_eq!(docs[1].column(0).to_vec(), vec![0.4]);
    }

    #[test]
    fn test_empty_batch() {
        let (flat, manifest) = flatten(&[]).unwrap();
        assert_eq!(flat.dim(), (0, 0));
        assert_eq!(manifest.n_docs(), 0);
        assert_eq!(manifest.total(), 0);
        let docs = split(flat.view(), &manifest).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_flatten_rejects_mixed_width() {
        let docs = vec![Array2::<f32>::zeros((2, 3)), Array2::<f32>::zeros((2, 4))];
        let err = flatten(&docs).unwrap_err();
        assert!(matches!(err, BoundaryError::Shape { expected: 3, actual: 4, .. }));
    }

    #[test]
    fn test_split_rejects_wrong_total() {
        let manifest = LengthManifest::new(vec![2, 2], 1);
        let flat = Array2::<f32>::zeros((3, 1));
        let err = split(flat.view(), &manifest).unwrap_err();
        assert!(matches!(err, BoundaryError::Shape { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_split_rejects_wrong_width() {
        let manifest = LengthManifest::new(vec![2], 2);
        let flat = Array2::<f32>::zeros((2, 3));
        assert!(split(flat.view(), &manifest).is_err());
    }
}
