//! Boundary model assemblies.
//!
//! Two compositions over the same collaborators:
//!
//! - [`BoundaryModelV1`]: vectorize → window → featurize → maxout mix →
//!   score. Every token is scored from a fixed-width neighborhood feature.
//! - [`BoundaryModelV2`]: vectorize → score each document per token →
//!   flatten. Simpler, no neighborhood features.
//!
//! Both are stateless per batch: `forward` returns a single-use context that
//! the matching `backward` consumes by value, so overlapping batches cannot
//! clobber each other's captured manifests. The assemblies own their
//! sub-components and hand out references by name for inspection or
//! independent fine-tuning.

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{BoundaryError, Result};
use crate::featurize::{self, FeaturizeContext};
use crate::flatten::{self, LengthManifest};
use crate::maxout::{Maxout, MaxoutContext};
use crate::window;

/// Seed for the lazily constructed feature mixer.
const MIXER_SEED: u64 = 0x5BD0;

/// Upstream collaborator: maps opaque documents to per-document token-vector
/// matrices (`[len, D]` each, one per input document, order preserved).
///
/// Paired-call contract: `backward` is only valid with the context returned
/// by the matching `forward`.
pub trait Vectorizer {
    /// Opaque document handle.
    type Doc;
    /// Backward-pass state for one forward call.
    type Ctx;

    /// Vectorize a batch of documents.
    fn forward(&self, docs: &[Self::Doc]) -> Result<(Vec<Array2<f32>>, Self::Ctx)>;

    /// Consume the ragged per-document gradients for a batch.
    fn backward(&self, d_docs: Vec<Array2<f32>>, ctx: Self::Ctx) -> Result<()>;
}

/// Downstream collaborator: maps a matrix of feature vectors to a matrix of
/// scores with the same row count, and routes a matching gradient back.
pub trait Scorer {
    /// Backward-pass state for one forward call.
    type Ctx;

    /// Score a batch of rows.
    fn forward(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Self::Ctx)>;

    /// Route a score gradient back to an input gradient of matching shape.
    fn backward(&self, d_y: ArrayView2<f32>, ctx: Self::Ctx) -> Result<Array2<f32>>;
}

/// Backward-pass state for one [`BoundaryModelV1`] batch.
pub struct V1Context<VC, SC> {
    vec_ctx: VC,
    manifest: LengthManifest,
    feat_ctx: FeaturizeContext,
    /// Mixer and scorer state; absent for batches with no tokens, which
    /// bypass both layers.
    scored: Option<(MaxoutContext, SC)>,
}

/// Windowed boundary model: per-token neighborhood features mixed through a
/// maxout layer, then scored.
pub struct BoundaryModelV1<V: Vectorizer, S: Scorer> {
    vectorizer: V,
    scorer: S,
    mixer: Option<Maxout>,
    hidden_size: usize,
    window_size: usize,
}

impl<V: Vectorizer, S: Scorer> BoundaryModelV1<V, S> {
    /// Compose a v1 model. `hidden_size` is the mixer's output width,
    /// `window_size` the neighborhood half-width W. Fails with a Config
    /// error if `hidden_size` is zero.
    ///
    /// The mixer itself is sized on the first batch, once the token
    /// dimensionality is known.
    pub fn new(vectorizer: V, scorer: S, hidden_size: usize, window_size: usize) -> Result<Self> {
        if hidden_size == 0 {
            return Err(BoundaryError::config("hidden size must be positive"));
        }
        Ok(Self {
            vectorizer,
            scorer,
            mixer: None,
            hidden_size,
            window_size,
        })
    }

    /// Run one batch. Returns the flat score matrix and the context the
    /// matching [`backward`](Self::backward) call consumes.
    pub fn forward(
        &mut self,
        docs: &[V::Doc],
    ) -> Result<(Array2<f32>, V1Context<V::Ctx, S::Ctx>)> {
        let (vectors, vec_ctx) = self.vectorizer.forward(docs)?;
        let (windows, manifest) = window::build_windows(&vectors, self.window_size)?;
        let (features, feat_ctx) = featurize::forward(&windows.view());

        // A batch with no tokens bypasses the mixer and scorer entirely;
        // the mixer cannot be sized from it and has nothing to mix.
        if features.nrows() == 0 {
            debug!(docs = docs.len(), "boundary v1 forward (no tokens)");
            return Ok((
                Array2::zeros((0, 0)),
                V1Context {
                    vec_ctx,
                    manifest,
                    feat_ctx,
                    scored: None,
                },
            ));
        }

        match self.mixer.as_ref() {
            Some(m) if m.n_in() != features.ncols() => {
                return Err(BoundaryError::shape(
                    "mixer input width",
                    m.n_in(),
                    features.ncols(),
                ));
            }
            Some(_) => {}
            None => {
                self.mixer = Some(Maxout::new(features.ncols(), self.hidden_size, MIXER_SEED)?);
            }
        }
        let mixer = self
            .mixer
            .as_ref()
            .ok_or_else(|| BoundaryError::config("mixer not initialized"))?;
        let (mixed, mix_ctx) = mixer.forward(features.view())?;
        let (scores, score_ctx) = self.scorer.forward(mixed.view())?;

        debug!(
            docs = docs.len(),
            tokens = manifest.total(),
            window = self.window_size,
            "boundary v1 forward"
        );
        Ok((
            scores,
            V1Context {
                vec_ctx,
                manifest,
                feat_ctx,
                scored: Some((mix_ctx, score_ctx)),
            },
        ))
    }

    /// Route a flat score gradient back through the whole pipeline, ending
    /// in the vectorizer's backward with ragged per-document gradients.
    pub fn backward(
        &mut self,
        d_scores: ArrayView2<f32>,
        ctx: V1Context<V::Ctx, S::Ctx>,
    ) -> Result<()> {
        let d_features = match ctx.scored {
            Some((mix_ctx, score_ctx)) => {
                let d_mixed = self.scorer.backward(d_scores, score_ctx)?;
                let mixer = self
                    .mixer
                    .as_mut()
                    .ok_or_else(|| BoundaryError::config("backward called before any forward"))?;
                mixer.backward(d_mixed.view(), mix_ctx)?
            }
            None => {
                // Token-free batch: the forward pass produced no scores.
                if d_scores.nrows() != 0 {
                    return Err(BoundaryError::shape("score gradient rows", 0, d_scores.nrows()));
                }
                Array2::zeros((0, 3 * ctx.manifest.width()))
            }
        };
        let d_docs = featurize::backward(&d_features.view(), &ctx.feat_ctx, &ctx.manifest)?;
        debug!(tokens = ctx.manifest.total(), "boundary v1 backward");
        self.vectorizer.backward(d_docs, ctx.vec_ctx)
    }

    /// The vectorizer sub-component.
    pub fn vectorizer(&self) -> &V {
        &self.vectorizer
    }

    /// Mutable access for fine-tuning the vectorizer.
    pub fn vectorizer_mut(&mut self) -> &mut V {
        &mut self.vectorizer
    }

    /// The scorer sub-component.
    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Mutable access for fine-tuning the scorer.
    pub fn scorer_mut(&mut self) -> &mut S {
        &mut self.scorer
    }

    /// Neighborhood half-width W of the windowed featurizer.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Output width of the feature mixer.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// The feature mixer, once the first batch has sized it.
    pub fn mixer(&self) -> Option<&Maxout> {
        self.mixer.as_ref()
    }

    /// Mutable access for fine-tuning the mixer.
    pub fn mixer_mut(&mut self) -> Option<&mut Maxout> {
        self.mixer.as_mut()
    }
}

/// Backward-pass state for one [`BoundaryModelV2`] batch.
pub struct V2Context<VC, SC> {
    vec_ctx: VC,
    manifest: LengthManifest,
    score_ctxs: Vec<SC>,
}

/// Per-token boundary model: the scorer runs over each document's token
/// vectors directly and the per-document scores are flattened into one batch.
pub struct BoundaryModelV2<V: Vectorizer, S: Scorer> {
    vectorizer: V,
    scorer: S,
}

impl<V: Vectorizer, S: Scorer> BoundaryModelV2<V, S> {
    /// Compose a v2 model.
    pub fn new(vectorizer: V, scorer: S) -> Self {
        Self { vectorizer, scorer }
    }

    /// Run one batch: vectorize, score each document per token, flatten.
    pub fn forward(
        &self,
        docs: &[V::Doc],
    ) -> Result<(Array2<f32>, V2Context<V::Ctx, S::Ctx>)> {
        let (vectors, vec_ctx) = self.vectorizer.forward(docs)?;

        let mut scored = Vec::with_capacity(vectors.len());
        let mut score_ctxs = Vec::with_capacity(vectors.len());
        for doc in &vectors {
            let (y, ctx) = self.scorer.forward(doc.view())?;
            if y.nrows() != doc.nrows() {
                return Err(BoundaryError::shape("per-token score rows", doc.nrows(), y.nrows()));
            }
            scored.push(y);
            score_ctxs.push(ctx);
        }

        let (flat, manifest) = flatten::flatten(&scored)?;
        debug!(docs = docs.len(), tokens = manifest.total(), "boundary v2 forward");
        Ok((
            flat,
            V2Context {
                vec_ctx,
                manifest,
                score_ctxs,
            },
        ))
    }

    /// Split the flat gradient by the captured manifest, run the scorer
    /// backward per document, and hand the ragged result to the vectorizer.
    pub fn backward(
        &self,
        d_flat: ArrayView2<f32>,
        ctx: V2Context<V::Ctx, S::Ctx>,
    ) -> Result<()> {
        let d_docs = flatten::split(d_flat, &ctx.manifest)?;

        let mut d_vectors = Vec::with_capacity(d_docs.len());
        for (d_doc, score_ctx) in d_docs.into_iter().zip(ctx.score_ctxs) {
            d_vectors.push(self.scorer.backward(d_doc.view(), score_ctx)?);
        }
        debug!(tokens = ctx.manifest.total(), "boundary v2 backward");
        self.vectorizer.backward(d_vectors, ctx.vec_ctx)
    }

    /// The vectorizer sub-component.
    pub fn vectorizer(&self) -> &V {
        &self.vectorizer
    }

    /// Mutable access for fine-tuning the vectorizer.
    pub fn vectorizer_mut(&mut self) -> &mut V {
        &mut self.vectorizer
    }

    /// The per-token scoring sub-component.
    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Mutable access for fine-tuning the scorer.
    pub fn scorer_mut(&mut self) -> &mut S {
        &mut self.scorer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::cell::RefCell;

    /// Test vectorizer: hands out a fixed batch of token-vector matrices and
    /// records the ragged gradients its backward receives.
    struct FixedVectorizer {
        vectors: Vec<Array2<f32>>,
        received: RefCell<Option<Vec<Array2<f32>>>>,
    }

    impl FixedVectorizer {
        fn new(vectors: Vec<Array2<f32>>) -> Self {
            Self {
                vectors,
                received: RefCell::new(None),
            }
        }
    }

    impl Vectorizer for FixedVectorizer {
        type Doc = ();
        type Ctx = ();

        fn forward(&self, docs: &[()]) -> Result<(Vec<Array2<f32>>, ())> {
            assert_eq!(docs.len(), self.vectors.len());
            Ok((self.vectors.clone(), ()))
        }

        fn backward(&self, d_docs: Vec<Array2<f32>>, _ctx: ()) -> Result<()> {
            *self.received.borrow_mut() = Some(d_docs);
            Ok(())
        }
    }

    /// Test scorer: identity forward, identity gradient.
    struct IdentityScorer;

    impl Scorer for IdentityScorer {
        type Ctx = ();

        fn forward(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, ())> {
            Ok((x.to_owned(), ()))
        }

        fn backward(&self, d_y: ArrayView2<f32>, _ctx: ()) -> Result<Array2<f32>> {
            Ok(d_y.to_owned())
        }
    }

    /// Test scorer: one score per row, the row sum.
    struct RowSumScorer;

    impl Scorer for RowSumScorer {
        type Ctx = usize;

        fn forward(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, usize)> {
            let mut y = Array2::zeros((x.nrows(), 1));
            for (i, row) in x.rows().into_iter().enumerate() {
                y[[i, 0]] = row.sum();
            }
            Ok((y, x.ncols()))
        }

        fn backward(&self, d_y: ArrayView2<f32>, width: usize) -> Result<Array2<f32>> {
            let mut d_x = Array2::zeros((d_y.nrows(), width));
            for i in 0..d_y.nrows() {
                for k in 0..width {
                    d_x[[i, k]] = d_y[[i, 0]];
                }
            }
            Ok(d_x)
        }
    }

    fn sample_batch() -> Vec<Array2<f32>> {
        vec![
            array![[1.0_f32, 0.5], [2.0, -0.5], [3.0, 0.0]],
            array![[4.0_f32, 1.0]],
        ]
    }

    #[test]
    fn test_v1_rejects_zero_hidden_size() {
        let model = BoundaryModelV1::new(FixedVectorizer::new(vec![]), IdentityScorer, 0, 1);
        assert!(matches!(model, Err(BoundaryError::Config { .. })));
    }

    #[test]
    fn test_v1_forward_backward_round_trip() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(sample_batch()), IdentityScorer, 4, 1)
                .unwrap();

        let (scores, ctx) = model.forward(&[(), ()]).unwrap();
        // 4 tokens, identity scorer on the 4-wide mixed features.
        assert_eq!(scores.dim(), (4, 4));
        // Mixer got sized from the 3D-wide features (D = 2).
        assert_eq!(model.mixer().unwrap().n_in(), 6);
        assert_eq!(model.mixer().unwrap().n_out(), 4);

        let d_scores = Array2::from_shape_fn(scores.dim(), |(i, j)| (i + j) as f32 * 0.1);
        model.backward(d_scores.view(), ctx).unwrap();

        let received = model.vectorizer().received.borrow();
        let grads = received.as_ref().expect("vectorizer should receive gradients");
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].dim(), (3, 2));
        assert_eq!(grads[1].dim(), (1, 2));
    }

    #[test]
    fn test_v1_mixer_gradients_accumulate() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(sample_batch()), IdentityScorer, 4, 1)
                .unwrap();
        let (scores, ctx) = model.forward(&[(), ()]).unwrap();
        let d_scores = Array2::from_shape_fn(scores.dim(), |(i, j)| (i * 4 + j) as f32 * 0.05);
        model.backward(d_scores.view(), ctx).unwrap();

        let mixer = model.mixer().unwrap();
        let norm: f32 = mixer.d_w.iter().map(|v| v * v).sum();
        assert!(norm > 0.0);
    }

    #[test]
    fn test_v1_batches_do_not_share_contexts() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(sample_batch()), IdentityScorer, 3, 1)
                .unwrap();

        // Two overlapping forward passes, backwards applied out of order.
        let (scores_a, ctx_a) = model.forward(&[(), ()]).unwrap();
        let (_, ctx_b) = model.forward(&[(), ()]).unwrap();
        model.backward(Array2::ones(scores_a.dim()).view(), ctx_b).unwrap();
        model.backward(Array2::ones(scores_a.dim()).view(), ctx_a).unwrap();

        let received = model.vectorizer().received.borrow();
        assert_eq!(received.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_v1_empty_batch() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(vec![]), IdentityScorer, 4, 1).unwrap();
        let (scores, ctx) = model.forward(&[]).unwrap();
        assert_eq!(scores.nrows(), 0);
        // No tokens, so the mixer is neither sized nor touched.
        assert!(model.mixer().is_none());
        model.backward(scores.view(), ctx).unwrap();
        assert!(model.vectorizer().received.borrow().as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_v1_batch_of_empty_documents() {
        let vectors = vec![Array2::<f32>::zeros((0, 2)), Array2::<f32>::zeros((0, 2))];
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(vectors), IdentityScorer, 4, 1).unwrap();
        let (scores, ctx) = model.forward(&[(), ()]).unwrap();
        assert_eq!(scores.nrows(), 0);
        model.backward(scores.view(), ctx).unwrap();

        let received = model.vectorizer().received.borrow();
        let grads = received.as_ref().unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].dim(), (0, 2));
    }

    #[test]
    fn test_v1_token_free_batch_rejects_nonempty_gradient() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(vec![]), IdentityScorer, 4, 1).unwrap();
        let (_, ctx) = model.forward(&[]).unwrap();
        let d_scores = Array2::<f32>::zeros((1, 1));
        assert!(model.backward(d_scores.view(), ctx).is_err());
    }

    #[test]
    fn test_v2_forward_flattens_scores() {
        let model = BoundaryModelV2::new(FixedVectorizer::new(sample_batch()), RowSumScorer);
        let (flat, _) = model.forward(&[(), ()]).unwrap();
        assert_eq!(flat.dim(), (4, 1));
        assert!((flat[[0, 0]] - 1.5).abs() < 1e-6);
        assert!((flat[[3, 0]] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_v2_backward_rerags_by_manifest() {
        let model = BoundaryModelV2::new(FixedVectorizer::new(sample_batch()), RowSumScorer);
        let (flat, ctx) = model.forward(&[(), ()]).unwrap();

        let d_flat = array![[1.0_f32], [2.0], [3.0], [4.0]];
        model.backward(d_flat.view(), ctx).unwrap();

        let received = model.vectorizer().received.borrow();
        let grads = received.as_ref().unwrap();
        assert_eq!(grads.len(), 2);
        // Row-sum scorer broadcasts each score gradient across the row.
        assert_eq!(grads[0].dim(), (3, 2));
        assert_eq!(grads[0][[1, 0]], 2.0);
        assert_eq!(grads[0][[1, 1]], 2.0);
        assert_eq!(grads[1][[0, 0]], 4.0);
        let _ = flat;
    }

    #[test]
    fn test_v2_backward_rejects_wrong_total() {
        let model = BoundaryModelV2::new(FixedVectorizer::new(sample_batch()), RowSumScorer);
        let (_, ctx) = model.forward(&[(), ()]).unwrap();
        let d_flat = Array2::<f32>::zeros((3, 1));
        assert!(model.backward(d_flat.view(), ctx).is_err());
    }

    #[test]
    fn test_v2_empty_batch() {
        let model = BoundaryModelV2::new(FixedVectorizer::new(vec![]), RowSumScorer);
        let (flat, ctx) = model.forward(&[]).unwrap();
        assert_eq!(flat.nrows(), 0);
        model.backward(flat.view(), ctx).unwrap();
    }

    #[test]
    fn test_named_subcomponent_access() {
        let mut model =
            BoundaryModelV1::new(FixedVectorizer::new(sample_batch()), IdentityScorer, 2, 1)
                .unwrap();
        assert!(model.mixer().is_none());
        let _ = model.vectorizer();
        let _ = model.scorer_mut();

        let (_, ctx) = model.forward(&[(), ()]).unwrap();
        drop(ctx);
        // Fine-tune the mixer independently of the rest of the pipeline.
        model.mixer_mut().unwrap().apply_gradients(0.01);
    }
}
