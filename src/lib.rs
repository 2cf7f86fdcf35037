//! Autoregressive generation of hand animations.
//!
//! A [`decoder::Decoder`] extends batches of joint-angle sequences one token
//! at a time, conditioning a [`decoder::Model`] on a fixed trailing window
//! and drawing each new angle with a [`decoder::Sampler`].

pub mod config;
pub mod decoder;
pub mod distribution;
pub mod error;
pub mod model;
pub mod output;
pub mod sequence;

pub use decoder::{Decoder, Model, Sampler};
pub use error::{ConfigError, DecodeError};
pub use sequence::{SequenceState, TokenIndex, TokenLayout, Window};
