//! # span-boundary
//!
//! Trainable span-boundary scoring core for NLP pipelines. Given per-token
//! vector representations for each document in a batch, it produces per-token
//! boundary scores suitable for downstream span extraction.
//!
//! ## Components
//!
//! 1. **Window Constructor** — one fixed-height `[2W+1, D]` neighborhood per
//!    token, boundary positions padded with the center vector
//! 2. **Windowed Featurizer** — `[center, mean, max]` features of width 3D,
//!    with center-row-only gradient routing
//! 3. **Ragged/Flat Converter** — lossless flatten/split between
//!    per-document and per-batch layouts via a captured length manifest
//! 4. **Maxout mixer** — fixed-width, layer-normalized feature mixing for
//!    the windowed path
//! 5. **Assemblies** — [`model::BoundaryModelV1`] (windowed) and
//!    [`model::BoundaryModelV2`] (per-token), composed with external
//!    [`model::Vectorizer`] and [`model::Scorer`] collaborators
//!
//! All components are pure per-batch transforms: each forward call returns a
//! single-use context that the paired backward call consumes, so concurrent
//! batches never share captured state.

pub mod error;
pub mod featurize;
pub mod flatten;
pub mod maxout;
pub mod model;
pub mod window;

pub use error::{BoundaryError, Result};
pub use flatten::LengthManifest;
pub use maxout::Maxout;
pub use model::{BoundaryModelV1, BoundaryModelV2, Scorer, Vectorizer};
