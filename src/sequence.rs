//! Batched token sequences and the index bookkeeping used while decoding.
//!
//! A token is one `(frame, hand, dof, angle)` tuple. Tokens inside a frame
//! are ordered hand-major, dof-minor, so the position of a token within its
//! frame is `hand * n_dof + dof`.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{DecodeError, Result};

/// Per-frame token ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLayout {
    n_hands: usize,
    n_dof: usize,
}

/// Position of the `i`-th generated token relative to the first generated
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenIndex {
    pub frame_offset: usize,
    pub hand: u32,
    pub dof: u32,
}

impl TokenLayout {
    pub fn new(n_hands: usize, n_dof: usize) -> Result<Self> {
        if n_hands == 0 || n_dof == 0 {
            return Err(DecodeError::Configuration(format!(
                "n_hands and n_dof must be positive, got {n_hands} and {n_dof}"
            )));
        }
        if u32::try_from(n_hands).is_err() || u32::try_from(n_dof).is_err() {
            return Err(DecodeError::Configuration(
                "n_hands and n_dof must fit in u32".into(),
            ));
        }
        Ok(Self { n_hands, n_dof })
    }

    pub fn n_hands(&self) -> usize {
        self.n_hands
    }

    pub fn n_dof(&self) -> usize {
        self.n_dof
    }

    pub fn tokens_per_frame(&self) -> usize {
        self.n_hands * self.n_dof
    }

    /// Token slots covering `n_frames` frames.
    pub fn target_token_count(&self, n_frames: usize) -> usize {
        n_frames * self.tokens_per_frame()
    }

    /// Closed-form indices of generation step `i`.
    pub fn index_at(&self, i: usize) -> TokenIndex {
        TokenIndex {
            frame_offset: i / self.tokens_per_frame(),
            // both bounded by the u32 check in `new`
            hand: ((i / self.n_dof) % self.n_hands) as u32,
            dof: (i % self.n_dof) as u32,
        }
    }
}

/// Read-only, batch-major view of the trailing context handed to a model.
///
/// Every view has shape `(batch, positions)`. While decoding, `angles` is one
/// position shorter than the index views: the newest token has indices but
/// no angle yet.
#[derive(Clone, Debug)]
pub struct Window<'a> {
    pub angles: ArrayView2<'a, f32>,
    pub frame_idxs: ArrayView2<'a, u32>,
    pub hand_idxs: ArrayView2<'a, u32>,
    pub dof_idxs: ArrayView2<'a, u32>,
}

impl Window<'_> {
    pub fn batch_size(&self) -> usize {
        self.frame_idxs.nrows()
    }

    /// Number of index positions in the window.
    pub fn positions(&self) -> usize {
        self.frame_idxs.ncols()
    }
}

/// The four parallel sequences of a batch of decodes.
///
/// Storage is time-major (`positions x batch`) so appending a step is an
/// amortized O(1) row push; accessors expose batch-major views.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceState {
    angles: Array2<f32>,
    frame_idxs: Array2<u32>,
    hand_idxs: Array2<u32>,
    dof_idxs: Array2<u32>,
}

impl SequenceState {
    /// An empty state for `batch` sequences.
    pub fn empty(batch: usize) -> Result<Self> {
        if batch == 0 {
            return Err(DecodeError::Shape("batch must hold at least one sequence".into()));
        }
        Ok(Self {
            angles: Array2::zeros((0, batch)),
            frame_idxs: Array2::zeros((0, batch)),
            hand_idxs: Array2::zeros((0, batch)),
            dof_idxs: Array2::zeros((0, batch)),
        })
    }

    /// Seed state from batch-major `(batch, len)` arrays.
    pub fn from_batch_major(
        angles: Array2<f32>,
        frame_idxs: Array2<u32>,
        hand_idxs: Array2<u32>,
        dof_idxs: Array2<u32>,
    ) -> Result<Self> {
        let shape = angles.dim();
        for (name, dim) in [
            ("frame_idxs", frame_idxs.dim()),
            ("hand_idxs", hand_idxs.dim()),
            ("dof_idxs", dof_idxs.dim()),
        ] {
            if dim != shape {
                return Err(DecodeError::Shape(format!(
                    "{name} has shape {dim:?} but angles has shape {shape:?}"
                )));
            }
        }
        if shape.0 == 0 {
            return Err(DecodeError::Shape("batch must hold at least one sequence".into()));
        }
        Ok(Self {
            angles: time_major(angles),
            frame_idxs: time_major(frame_idxs),
            hand_idxs: time_major(hand_idxs),
            dof_idxs: time_major(dof_idxs),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.frame_idxs.ncols()
    }

    /// Number of indexed positions.
    pub fn len(&self) -> usize {
        self.frame_idxs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of positions that already carry an angle.
    pub fn angle_len(&self) -> usize {
        self.angles.nrows()
    }

    /// First frame to generate for each batch element: zero for an empty
    /// state, otherwise one past the last seeded frame.
    pub fn start_frames(&self) -> Result<Array1<u32>> {
        match self.len() {
            0 => Ok(Array1::zeros(self.batch_size())),
            n => offset_frames(self.frame_idxs.row(n - 1), 1),
        }
    }

    /// Append one position's indices; the angle follows via `push_angles`.
    pub fn push_index(&mut self, frames: ArrayView1<'_, u32>, hand: u32, dof: u32) -> Result<()> {
        if self.angle_len() != self.len() {
            return Err(DecodeError::Shape(
                "previous position has no angle yet".into(),
            ));
        }
        let batch = self.batch_size();
        self.frame_idxs.push_row(frames)?;
        self.hand_idxs.push_row(Array1::from_elem(batch, hand).view())?;
        self.dof_idxs.push_row(Array1::from_elem(batch, dof).view())?;
        Ok(())
    }

    /// Fill in the angle of the newest indexed position.
    pub fn push_angles(&mut self, angles: ArrayView1<'_, f32>) -> Result<()> {
        if self.angle_len() >= self.len() {
            return Err(DecodeError::Shape(
                "no indexed position is waiting for an angle".into(),
            ));
        }
        self.angles.push_row(angles)?;
        Ok(())
    }

    /// Trailing view of at most `window_size` indexed positions.
    ///
    /// The angle view starts at the same position, so it is one shorter than
    /// the index views when the newest position has no angle yet.
    pub fn window(&self, window_size: usize) -> Window<'_> {
        let start = self.len().saturating_sub(window_size);
        let angle_start = start.min(self.angle_len());
        Window {
            angles: self.angles.slice(s![angle_start.., ..]).reversed_axes(),
            frame_idxs: self.frame_idxs.slice(s![start.., ..]).reversed_axes(),
            hand_idxs: self.hand_idxs.slice(s![start.., ..]).reversed_axes(),
            dof_idxs: self.dof_idxs.slice(s![start.., ..]).reversed_axes(),
        }
    }

    pub fn angles(&self) -> ArrayView2<'_, f32> {
        self.angles.t()
    }

    pub fn frame_idxs(&self) -> ArrayView2<'_, u32> {
        self.frame_idxs.t()
    }

    pub fn hand_idxs(&self) -> ArrayView2<'_, u32> {
        self.hand_idxs.t()
    }

    pub fn dof_idxs(&self) -> ArrayView2<'_, u32> {
        self.dof_idxs.t()
    }

    /// Batch-major `(batch, len)` angles in standard layout.
    pub fn into_angles(self) -> Array2<f32> {
        self.angles.reversed_axes().as_standard_layout().into_owned()
    }
}

/// `frames + offset`, failing instead of wrapping or saturating.
pub fn offset_frames(frames: ArrayView1<'_, u32>, offset: u32) -> Result<Array1<u32>> {
    frames
        .iter()
        .map(|f| f.checked_add(offset))
        .collect::<Option<Vec<_>>>()
        .map(Array1::from)
        .ok_or_else(|| DecodeError::Shape("frame index overflow".into()))
}

fn time_major<A: Clone>(batch_major: Array2<A>) -> Array2<A> {
    batch_major.reversed_axes().as_standard_layout().into_owned()
}
