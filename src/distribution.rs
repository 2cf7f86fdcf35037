//! Von Mises distributions over joint angles and the samplers built on them.
//!
//! Models emit two raw parameters per position: the location (radians,
//! any range) and an unconstrained concentration that is mapped through a
//! softplus.

use std::f64::consts::PI;

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::decoder::Sampler;

/// Raw parameters consumed per position.
pub const N_PARAMS: usize = 2;

const MIN_CONCENTRATION: f64 = 1e-3;

/// Circular distribution over an angle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VonMises {
    loc: f64,
    concentration: f64,
}

impl VonMises {
    pub fn new(loc: f64, concentration: f64) -> Result<Self> {
        if !loc.is_finite() || !concentration.is_finite() || concentration <= 0.0 {
            bail!("invalid von Mises parameters: loc={loc}, concentration={concentration}");
        }
        Ok(Self { loc: wrap_angle(loc), concentration })
    }

    /// Build from one position's raw model output.
    pub fn from_params(params: ArrayView1<'_, f32>) -> Result<Self> {
        if params.len() < N_PARAMS {
            bail!("expected {N_PARAMS} distribution parameters, got {}", params.len());
        }
        let concentration = softplus(params[1] as f64) + MIN_CONCENTRATION;
        Self::new(params[0] as f64, concentration)
    }

    pub fn loc(&self) -> f64 {
        self.loc
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn mean(&self) -> f64 {
        self.loc
    }

    /// Draw one angle with the Best-Fisher rejection sampler.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let kappa = self.concentration;
        let tau = 1.0 + (1.0 + 4.0 * kappa * kappa).sqrt();
        let rho = (tau - (2.0 * tau).sqrt()) / (2.0 * kappa);
        let r = (1.0 + rho * rho) / (2.0 * rho);

        loop {
            let u1: f64 = rng.gen();
            let u2: f64 = rng.gen();
            let u3: f64 = rng.gen();

            let z = (PI * u1).cos();
            let f = (1.0 + r * z) / (r + z);
            let c = kappa * (r - f);
            if c * (2.0 - c) - u2 > 0.0 || (c / u2).ln() + 1.0 - c >= 0.0 {
                let theta = f.clamp(-1.0, 1.0).acos();
                let theta = if u3 < 0.5 { -theta } else { theta };
                return wrap_angle(self.loc + theta);
            }
        }
    }
}

/// Wrap into `[-pi, pi)`.
pub fn wrap_angle(angle: f64) -> f64 {
    angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor()
}

fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

fn map_rows(params: ArrayView2<'_, f32>, mut f: impl FnMut(VonMises) -> f64) -> Result<Array1<f32>> {
    let mut out = Array1::zeros(params.nrows());
    for (slot, row) in out.iter_mut().zip(params.rows()) {
        *slot = f(VonMises::from_params(row)?) as f32;
    }
    Ok(out)
}

/// Deterministic sampler returning the distribution mean.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanSampler;

impl Sampler for MeanSampler {
    fn sample(&mut self, params: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        map_rows(params, |dist| dist.mean())
    }
}

/// Random sampler; reproducible for a fixed seed.
#[derive(Clone, Debug)]
pub struct VonMisesSampler {
    rng: ChaCha8Rng,
}

impl VonMisesSampler {
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { rng: ChaCha8Rng::from_entropy() }
    }
}

impl Sampler for VonMisesSampler {
    fn sample(&mut self, params: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        let rng = &mut self.rng;
        map_rows(params, |dist| dist.sample(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) + PI).abs() < 1e-9);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_angle(-0.5 - 2.0 * PI) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mean_sampler_returns_loc() {
        let params = array![[0.25_f32, 0.0], [-1.0, 3.0]];
        let angles = MeanSampler.sample(params.view()).unwrap();
        assert!((angles[0] - 0.25).abs() < 1e-6);
        assert!((angles[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_params_wraps_loc_and_bounds_concentration() {
        let dist = VonMises::from_params(array![(2.0 * PI + 0.5) as f32, -50.0].view()).unwrap();
        assert!((dist.loc() - 0.5).abs() < 1e-6);
        assert!(dist.concentration() >= MIN_CONCENTRATION);

        let sharp = VonMises::from_params(array![0.0_f32, 30.0].view()).unwrap();
        assert!((sharp.concentration() - 30.0 - MIN_CONCENTRATION).abs() < 1e-9);
    }

    #[test]
    fn test_entropy_sampler_draws_wrapped_angles() {
        let params = array![[0.0_f32, 0.0], [3.0, 2.0]];
        let angles = VonMisesSampler::from_entropy().sample(params.view()).unwrap();
        assert_eq!(angles.len(), 2);
        assert!(angles.iter().all(|a| (-PI as f32..=PI as f32).contains(a)));
    }

    #[test]
    fn test_short_params_rejected() {
        let params = array![[0.25_f32]];
        assert!(MeanSampler.sample(params.view()).is_err());
        assert!(VonMisesSampler::new(0).sample(params.view()).is_err());
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let params = array![[0.1_f32, 1.0], [2.0, -2.0], [-3.0, 5.0]];
        let a = VonMisesSampler::new(42).sample(params.view()).unwrap();
        let b = VonMisesSampler::new(42).sample(params.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_concentrated_samples_stay_near_loc() {
        let dist = VonMises::new(1.0, 400.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 2000;
        let mean = (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 1.0).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn test_samples_in_range() {
        let dist = VonMises::new(PI - 0.01, 0.01).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            let x = dist.sample(&mut rng);
            assert!((-PI..PI).contains(&x));
        }
    }
}
