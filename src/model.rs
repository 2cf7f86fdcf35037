//! Reference angle model: a small causal transformer over ndarray.
//!
//! Weights are random (seeded), which is enough to drive the decoder end to
//! end. Each position is embedded from its relative frame, hand and dof
//! indices plus the (sin, cos) of the previous position's angle, and the
//! head emits von Mises parameters for the position's own angle.

use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::decoder::Model;
use crate::distribution::N_PARAMS;
use crate::error::ConfigError;
use crate::sequence::{TokenLayout, Window};

/// Configuration for the transformer model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelArgs {
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Hidden dimension of the feed-forward network.
    pub hidden_dim: usize,
    /// Size of the relative frame embedding table.
    pub max_frames: usize,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            dim: 32,
            n_layers: 2,
            n_heads: 4,
            hidden_dim: 64,
            max_frames: 16,
        }
    }
}

impl ModelArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dim == 0 || self.n_heads == 0 || self.hidden_dim == 0 || self.max_frames == 0 {
            return Err(ConfigError::Invalid(
                "model dim, n_heads, hidden_dim and max_frames must be positive".into(),
            ));
        }
        if self.dim % self.n_heads != 0 {
            return Err(ConfigError::Invalid(format!(
                "dim {} is not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }
}

/// Embedding table mapping indices to vectors.
pub struct Embedding {
    weight: Array2<f32>, // n x dim
}

impl Embedding {
    pub fn new<R: Rng>(n: usize, dim: usize, rng: &mut R) -> Self {
        let weight = Array2::from_shape_fn((n, dim), |_| rng.gen_range(-0.1..0.1));
        Self { weight }
    }

    pub fn len(&self) -> usize {
        self.weight.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.nrows() == 0
    }

    /// Callers guarantee every index is below `len()`.
    pub fn forward(&self, idxs: &[usize]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((idxs.len(), self.weight.ncols()));
        for (i, &idx) in idxs.iter().enumerate() {
            out.row_mut(i).assign(&self.weight.row(idx));
        }
        out
    }
}

/// Fully connected layer.
pub struct Linear {
    weight: Array2<f32>, // out x in
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new<R: Rng>(in_features: usize, out_features: usize, bias: bool, rng: &mut R) -> Self {
        let weight = Array2::from_shape_fn((out_features, in_features), |_| rng.gen_range(-0.1..0.1));
        let bias = if bias {
            Some(Array1::from_shape_fn(out_features, |_| rng.gen_range(-0.1..0.1)))
        } else {
            None
        };
        Self { weight, bias }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += &b.view().insert_axis(Axis(0));
        }
        y
    }
}

/// Root mean square layer normalization.
pub struct RMSNorm {
    weight: Array1<f32>,
    eps: f32,
}

impl RMSNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            eps: 1e-6,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mean = x.mapv(|v| v * v).sum_axis(Axis(1)) / x.ncols().max(1) as f32;
        let denom = mean.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        let norm = x / &denom;
        norm * &self.weight.view().insert_axis(Axis(0))
    }
}

/// Causal multi-head self attention.
pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl Attention {
    pub fn new<R: Rng>(dim: usize, n_heads: usize, rng: &mut R) -> Self {
        let head_dim = dim / n_heads;
        Self {
            wq: Linear::new(dim, dim, false, rng),
            wk: Linear::new(dim, dim, false, rng),
            wv: Linear::new(dim, dim, false, rng),
            wo: Linear::new(dim, dim, false, rng),
            n_heads,
            head_dim,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);
        let seq = x.nrows();
        let scale = (self.head_dim as f32).sqrt();

        let mut out = Array2::<f32>::zeros((seq, self.n_heads * self.head_dim));
        for h in 0..self.n_heads {
            let (lo, hi) = (h * self.head_dim, (h + 1) * self.head_dim);
            let qh = q.slice(s![.., lo..hi]);
            let kh = k.slice(s![.., lo..hi]);
            let vh = v.slice(s![.., lo..hi]);

            // position i only sees j <= i
            let mut scores = Array2::<f32>::from_elem((seq, seq), f32::NEG_INFINITY);
            for i in 0..seq {
                for j in 0..=i {
                    scores[[i, j]] = qh.row(i).dot(&kh.row(j)) / scale;
                }
            }
            for mut row in scores.axis_iter_mut(Axis(0)) {
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in row.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                row /= sum;
            }
            out.slice_mut(s![.., lo..hi]).assign(&scores.dot(&vh));
        }
        self.wo.forward(&out)
    }
}

/// Feed-forward network using SILU activation.
pub struct MLP {
    w1: Linear,
    w2: Linear,
}

impl MLP {
    pub fn new<R: Rng>(dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self {
            w1: Linear::new(dim, hidden_dim, false, rng),
            w2: Linear::new(hidden_dim, dim, false, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.w1.forward(x).mapv(|v| v * (1.0 / (1.0 + (-v).exp()))); // silu
        self.w2.forward(&hidden)
    }
}

/// Transformer block consisting of attention and feed-forward layers.
pub struct Block {
    attn_norm: RMSNorm,
    attn: Attention,
    ffn_norm: RMSNorm,
    ffn: MLP,
}

impl Block {
    pub fn new<R: Rng>(args: &ModelArgs, rng: &mut R) -> Self {
        Self {
            attn_norm: RMSNorm::new(args.dim),
            attn: Attention::new(args.dim, args.n_heads, rng),
            ffn_norm: RMSNorm::new(args.dim),
            ffn: MLP::new(args.dim, args.hidden_dim, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let h = self.attn_norm.forward(x);
        let h = self.attn.forward(&h);
        let x = x + &h;
        let h = self.ffn_norm.forward(&x);
        let h = self.ffn.forward(&h);
        x + &h
    }
}

/// Transformer predicting von Mises parameters for every window position.
pub struct AngleTransformer {
    pub args: ModelArgs,
    frame_embed: Embedding,
    hand_embed: Embedding,
    dof_embed: Embedding,
    angle_proj: Linear,
    layers: Vec<Block>,
    norm: RMSNorm,
    head: Linear,
}

impl AngleTransformer {
    pub fn new(args: ModelArgs, layout: TokenLayout, seed: u64) -> Result<Self, ConfigError> {
        args.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let frame_embed = Embedding::new(args.max_frames, args.dim, &mut rng);
        let hand_embed = Embedding::new(layout.n_hands(), args.dim, &mut rng);
        let dof_embed = Embedding::new(layout.n_dof(), args.dim, &mut rng);
        let angle_proj = Linear::new(2, args.dim, true, &mut rng);
        let layers = (0..args.n_layers).map(|_| Block::new(&args, &mut rng)).collect();
        let norm = RMSNorm::new(args.dim);
        let head = Linear::new(args.dim, N_PARAMS, true, &mut rng);
        Ok(Self {
            args,
            frame_embed,
            hand_embed,
            dof_embed,
            angle_proj,
            layers,
            norm,
            head,
        })
    }

    /// Hidden input for batch element `b` of the window.
    fn embed(&self, window: &Window<'_>, b: usize) -> Result<Array2<f32>> {
        let positions = window.positions();
        let frames = window.frame_idxs.row(b);
        let first = frames.get(0).copied().unwrap_or(0);
        let rel_frames: Vec<usize> = frames
            .iter()
            .map(|&f| (f.saturating_sub(first) as usize).min(self.frame_embed.len() - 1))
            .collect();
        let hands = checked_idxs(window.hand_idxs.row(b).iter(), self.hand_embed.len(), "hand")?;
        let dofs = checked_idxs(window.dof_idxs.row(b).iter(), self.dof_embed.len(), "dof")?;

        // angle of position t - 1 conditions position t
        let angles = window.angles.row(b);
        let mut prev = Array2::<f32>::zeros((positions, 2));
        for t in 1..positions {
            if let Some(&a) = angles.get(t - 1) {
                prev[[t, 0]] = a.sin();
                prev[[t, 1]] = a.cos();
            }
        }

        Ok(self.frame_embed.forward(&rel_frames)
            + self.hand_embed.forward(&hands)
            + self.dof_embed.forward(&dofs)
            + self.angle_proj.forward(&prev))
    }

    /// Distribution parameters for a single sequence, `(positions, N_PARAMS)`.
    pub fn forward(&self, window: &Window<'_>, b: usize) -> Result<Array2<f32>> {
        let mut h = self.embed(window, b)?;
        for layer in &self.layers {
            h = layer.forward(&h);
        }
        let h = self.norm.forward(&h);
        Ok(self.head.forward(&h))
    }
}

impl Model for AngleTransformer {
    fn infer(&self, window: &Window<'_>) -> Result<Array3<f32>> {
        let mut out = Array3::zeros((window.batch_size(), window.positions(), N_PARAMS));
        for b in 0..window.batch_size() {
            let params = self.forward(window, b)?;
            out.slice_mut(s![b, .., ..]).assign(&params);
        }
        Ok(out)
    }
}

fn checked_idxs<'a>(idxs: impl Iterator<Item = &'a u32>, len: usize, what: &str) -> Result<Vec<usize>> {
    idxs.map(|&i| {
        let i = i as usize;
        if i >= len {
            bail!("{what} index {i} out of range for {len} embeddings");
        }
        Ok(i)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceState;
    use ndarray::Array1;

    fn small_args() -> ModelArgs {
        ModelArgs {
            dim: 8,
            n_layers: 1,
            n_heads: 2,
            hidden_dim: 16,
            max_frames: 4,
        }
    }

    fn state(n: usize, n_hands: u32) -> SequenceState {
        let mut state = SequenceState::empty(2).unwrap();
        for t in 0..n as u32 {
            state.push_index(Array1::from_elem(2, t).view(), t % n_hands, 0).unwrap();
            state.push_angles(Array1::from_elem(2, 0.1 * t as f32).view()).unwrap();
        }
        state
    }

    #[test]
    fn test_forward_shapes() {
        let layout = TokenLayout::new(2, 1).unwrap();
        let model = AngleTransformer::new(small_args(), layout, 0).unwrap();
        let state = state(5, 2);
        let params = model.infer(&state.window(16)).unwrap();
        assert_eq!(params.dim(), (2, 5, N_PARAMS));

        let empty = SequenceState::empty(3).unwrap();
        assert_eq!(model.infer(&empty.window(16)).unwrap().dim(), (3, 0, N_PARAMS));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let layout = TokenLayout::new(2, 1).unwrap();
        let a = AngleTransformer::new(small_args(), layout, 9).unwrap();
        let b = AngleTransformer::new(small_args(), layout, 9).unwrap();
        let state = state(3, 2);
        let window = state.window(16);
        assert_eq!(a.infer(&window).unwrap(), b.infer(&window).unwrap());
    }

    #[test]
    fn test_causal_prefix_is_stable() {
        let layout = TokenLayout::new(2, 1).unwrap();
        let model = AngleTransformer::new(small_args(), layout, 1).unwrap();
        let long = state(4, 2);
        let short = state(3, 2);
        let full = model.infer(&long.window(16)).unwrap();
        let prefix = model.infer(&short.window(16)).unwrap();
        for (x, y) in full.slice(s![.., ..3, ..]).iter().zip(prefix.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_out_of_range_hand_is_error() {
        let layout = TokenLayout::new(1, 1).unwrap();
        let model = AngleTransformer::new(small_args(), layout, 0).unwrap();
        let state = state(2, 2);
        assert!(model.infer(&state.window(16)).is_err());
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        let args = ModelArgs { dim: 10, n_heads: 4, ..small_args() };
        let layout = TokenLayout::new(1, 1).unwrap();
        assert!(AngleTransformer::new(args, layout, 0).is_err());
    }
}
