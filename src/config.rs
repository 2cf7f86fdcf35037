//! Static configuration for decoding and generation.
//!
//! Configuration is read from a TOML file with `[decoder]`, `[model]` and
//! `[generation]` tables. Every table is optional and falls back to its
//! defaults.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{env, fs};

use crate::error::ConfigError;
use crate::model::ModelArgs;

/// Token layout and context size the model was trained with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Frames of context seen during training.
    pub chunk_size: usize,
    pub n_hands: usize,
    /// Degrees of freedom per hand.
    pub n_dof: usize,
    /// Number of independent sequences decoded together.
    pub batch_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            n_hands: 2,
            n_dof: 23,
            batch_size: 4,
        }
    }
}

impl DecoderConfig {
    pub fn tokens_per_frame(&self) -> usize {
        self.n_hands * self.n_dof
    }

    /// Trailing tokens passed to the model at each step.
    ///
    /// One frame short of the training chunk so the context stays
    /// in-distribution.
    pub fn window_size(&self) -> usize {
        self.chunk_size.saturating_sub(1) * self.tokens_per_frame()
    }

    /// Token slots covering `n_frames` frames.
    pub fn target_token_count(&self, n_frames: usize) -> usize {
        n_frames * self.tokens_per_frame()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be at least 2, got {}",
                self.chunk_size
            )));
        }
        if self.n_hands == 0 || self.n_dof == 0 {
            return Err(ConfigError::Invalid(format!(
                "n_hands and n_dof must be positive, got {} and {}",
                self.n_hands, self.n_dof
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Which trajectory the generator produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Distribution mean at every step.
    Mean,
    /// Random draws from the distribution.
    Sample,
    /// Both of the above from the same seed state.
    Both,
}

/// Parameters of a single generation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub n_frames: usize,
    pub mode: SamplingMode,
    /// Seed for sampling and model initialization.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            n_frames: 30,
            mode: SamplingMode::Both,
            seed: None,
        }
    }
}

/// Full application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub model: ModelArgs,
    pub generation: GenerationConfig,
}

impl Config {
    /// Load configuration from the TOML file at `path`.
    ///
    /// A missing file yields the defaults.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!("config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.decoder.validate()?;
        Ok(config)
    }

    /// Apply `HAND_ANIM_N_FRAMES` and `HAND_ANIM_SEED` overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("HAND_ANIM_N_FRAMES") {
            self.generation.n_frames = parse_env("HAND_ANIM_N_FRAMES", &v)?;
        }
        if let Ok(v) = env::var("HAND_ANIM_SEED") {
            self.generation.seed = Some(parse_env("HAND_ANIM_SEED", &v)?);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse {value:?}")))
}
