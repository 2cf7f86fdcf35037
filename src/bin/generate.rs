//! Generate hand animations with the reference angle model.
//!
//! Decodes `n_frames` frames for every sequence of the batch, starting from
//! an empty seed, and writes one angle file per trajectory.

use anyhow::{Context, Result};
use clap::Parser;
use hand_anim::config::{Config, SamplingMode};
use hand_anim::distribution::{MeanSampler, VonMisesSampler};
use hand_anim::model::AngleTransformer;
use hand_anim::output::AngleFile;
use hand_anim::{Decoder, Sampler, SequenceState, TokenLayout};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "hand-anim.toml")]
    config: PathBuf,

    /// Number of frames to generate
    #[arg(long)]
    frames: Option<usize>,

    /// Which trajectories to produce
    #[arg(long, value_enum)]
    mode: Option<SamplingMode>,

    /// Seed for model weights and sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Output prefix; writes `<out>.mean.bin` and/or `<out>.sample.bin`
    #[arg(long, default_value = "animation")]
    out: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application for generating animations.
pub struct GenerateApp {
    config: Config,
    model: AngleTransformer,
}

impl GenerateApp {
    /// Create a new generator application.
    ///
    /// Without a configured seed the weights come from `model_seed` and the
    /// sampler draws from OS entropy.
    pub fn new(config: Config, model_seed: u64) -> Result<Self> {
        let layout = TokenLayout::new(config.decoder.n_hands, config.decoder.n_dof)?;
        let model = AngleTransformer::new(config.model.clone(), layout, model_seed)
            .context("failed to build model")?;
        Ok(Self { config, model })
    }

    fn sampler(&self) -> VonMisesSampler {
        match self.config.generation.seed {
            Some(seed) => VonMisesSampler::new(seed),
            None => VonMisesSampler::from_entropy(),
        }
    }

    /// Decode every requested trajectory from an empty seed.
    pub fn generate(&self) -> Result<Vec<(&'static str, Array2<f32>)>> {
        let mut out = Vec::new();
        let mode = self.config.generation.mode;
        if matches!(mode, SamplingMode::Mean | SamplingMode::Both) {
            out.push(("mean", self.decode(MeanSampler)?));
        }
        if matches!(mode, SamplingMode::Sample | SamplingMode::Both) {
            out.push(("sample", self.decode(self.sampler())?));
        }
        Ok(out)
    }

    fn decode<S: Sampler>(&self, sampler: S) -> Result<Array2<f32>> {
        let cfg = &self.config.decoder;
        let mut decoder = Decoder::from_config(&self.model, sampler, cfg)?;
        let seed_state = SequenceState::empty(cfg.batch_size)?;
        let target = cfg.target_token_count(self.config.generation.n_frames);
        Ok(decoder.decode(seed_state, target)?)
    }
}

fn output_path(prefix: &Path, name: &str) -> PathBuf {
    let mut file = prefix.as_os_str().to_owned();
    file.push(format!(".{name}.bin"));
    PathBuf::from(file)
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let mut config = Config::from_toml(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.apply_env().context("invalid environment override")?;
    if let Some(frames) = args.frames {
        config.generation.n_frames = frames;
    }
    if let Some(mode) = args.mode {
        config.generation.mode = mode;
    }
    if let Some(seed) = args.seed {
        config.generation.seed = Some(seed);
    }
    config.decoder.validate()?;

    let seed = config.generation.seed.unwrap_or_else(rand::random);
    info!(
        model_seed = seed,
        n_frames = config.generation.n_frames,
        window_size = config.decoder.window_size(),
        "generating"
    );

    let app = GenerateApp::new(config, seed)?;
    for (name, angles) in app.generate()? {
        let path = output_path(&args.out, name);
        AngleFile::new(angles)
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "saved {name} trajectory");
    }
    Ok(())
}
