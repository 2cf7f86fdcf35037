//! Autoregressive decoding of hand animations.
//!
//! The decoder owns the sampling loop: it extends the index sequences one
//! token at a time, feeds the trailing window to a [`Model`], and draws the
//! next angle from the distribution the model predicts for the newest
//! position.

use ndarray::{s, Array1, Array2, Array3, ArrayView2};
use tracing::{debug, info, trace};

use crate::config::DecoderConfig;
use crate::error::{DecodeError, Result};
use crate::sequence::{offset_frames, SequenceState, TokenLayout, Window};

/// Maps a window of tokens to distribution parameters.
pub trait Model {
    /// Parameters for every position of the window, shaped
    /// `(batch, positions, n_params)`.
    fn infer(&self, window: &Window<'_>) -> anyhow::Result<Array3<f32>>;
}

/// Turns one position's distribution parameters into angles.
pub trait Sampler {
    /// `params` is `(batch, n_params)`; returns one angle per batch element.
    fn sample(&mut self, params: ArrayView2<'_, f32>) -> anyhow::Result<Array1<f32>>;
}

impl<M: Model + ?Sized> Model for &M {
    fn infer(&self, window: &Window<'_>) -> anyhow::Result<Array3<f32>> {
        (**self).infer(window)
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn infer(&self, window: &Window<'_>) -> anyhow::Result<Array3<f32>> {
        (**self).infer(window)
    }
}

impl<S: Sampler + ?Sized> Sampler for &mut S {
    fn sample(&mut self, params: ArrayView2<'_, f32>) -> anyhow::Result<Array1<f32>> {
        (**self).sample(params)
    }
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn sample(&mut self, params: ArrayView2<'_, f32>) -> anyhow::Result<Array1<f32>> {
        (**self).sample(params)
    }
}

/// Windowed autoregressive decoder.
pub struct Decoder<M, S> {
    model: M,
    sampler: S,
    window_size: usize,
    layout: TokenLayout,
}

impl<M: Model, S: Sampler> Decoder<M, S> {
    pub fn new(model: M, sampler: S, window_size: usize, n_hands: usize, n_dof: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(DecodeError::Configuration("window_size must be at least 1".into()));
        }
        let layout = TokenLayout::new(n_hands, n_dof)?;
        Ok(Self { model, sampler, window_size, layout })
    }

    /// Build a decoder whose window is derived from the training chunk size.
    pub fn from_config(model: M, sampler: S, cfg: &DecoderConfig) -> Result<Self> {
        Self::new(model, sampler, cfg.window_size(), cfg.n_hands, cfg.n_dof)
    }

    /// Decode and return the batch-major angles, seed included.
    ///
    /// The result has `initial.len() + target_token_count - 1` positions;
    /// with `target_token_count <= 1` the seed angles come back unchanged.
    pub fn decode(&mut self, initial: SequenceState, target_token_count: usize) -> Result<Array2<f32>> {
        Ok(self.decode_state(initial, target_token_count)?.into_angles())
    }

    /// Decode and return the complete sequence state.
    pub fn decode_state(
        &mut self,
        initial: SequenceState,
        target_token_count: usize,
    ) -> Result<SequenceState> {
        let mut state = initial;
        if state.angle_len() != state.len() {
            return Err(DecodeError::Shape(format!(
                "seed has {} angles for {} indexed positions",
                state.angle_len(),
                state.len()
            )));
        }
        let seed_len = state.len();
        self.bootstrap(&state)?;

        let n_new = target_token_count.saturating_sub(1);
        if n_new == 0 {
            debug!(batch = state.batch_size(), seed_len, "nothing to generate");
            return Ok(state);
        }
        let start_frames = state.start_frames()?;
        debug!(
            batch = state.batch_size(),
            seed_len,
            n_new,
            window_size = self.window_size,
            "starting decode"
        );

        for i in 0..n_new {
            let index = self.layout.index_at(i);
            let offset = u32::try_from(index.frame_offset)
                .map_err(|_| DecodeError::Shape("frame index overflow".into()))?;
            let frames = offset_frames(start_frames.view(), offset)?;
            state.push_index(frames.view(), index.hand, index.dof)?;

            let angles = {
                let window = state.window(self.window_size);
                trace!(
                    step = i,
                    positions = window.positions(),
                    hand = index.hand,
                    dof = index.dof,
                    "decode step"
                );
                self.next_angles(&window)?
            };
            state.push_angles(angles.view())?;
        }

        info!(
            batch = state.batch_size(),
            generated = n_new,
            total = state.len(),
            "decode complete"
        );
        Ok(state)
    }

    /// One inference over the seed before the loop starts.
    ///
    /// The draw is discarded; the call exists to surface collaborator errors
    /// and shape mismatches before any token is generated. An empty seed has
    /// no position to sample from, so only the model runs.
    fn bootstrap(&mut self, state: &SequenceState) -> Result<()> {
        let window = state.window(self.window_size);
        let params = self.infer(&window)?;
        if window.positions() == 0 {
            debug!(batch = window.batch_size(), "bootstrap on empty seed");
            return Ok(());
        }
        let angles = self.sample_last(&params)?;
        debug!(batch = angles.len(), "bootstrap sample drawn");
        Ok(())
    }

    fn next_angles(&mut self, window: &Window<'_>) -> Result<Array1<f32>> {
        let params = self.infer(window)?;
        self.sample_last(&params)
    }

    fn infer(&self, window: &Window<'_>) -> Result<Array3<f32>> {
        let params = self.model.infer(window).map_err(DecodeError::Model)?;
        let (batch, positions, _) = params.dim();
        if batch != window.batch_size() || positions != window.positions() {
            return Err(DecodeError::Shape(format!(
                "model returned {:?} for a window of {} x {}",
                params.dim(),
                window.batch_size(),
                window.positions()
            )));
        }
        Ok(params)
    }

    fn sample_last(&mut self, params: &Array3<f32>) -> Result<Array1<f32>> {
        let (batch, positions, _) = params.dim();
        let last = params.slice(s![.., positions - 1, ..]);
        let angles = self.sampler.sample(last).map_err(DecodeError::Sampler)?;
        if angles.len() != batch {
            return Err(DecodeError::Shape(format!(
                "sampler returned {} angles for a batch of {batch}",
                angles.len()
            )));
        }
        Ok(angles)
    }
}
