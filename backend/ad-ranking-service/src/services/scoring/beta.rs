use rand::Rng;
use rand_distr::{Distribution, Gamma};

/// Smallest shape handed to the Gamma draws
const MIN_SHAPE: f64 = 1e-6;

/// Beta(α, β) sampler built from two Gamma(shape, 1) draws: `X / (X + Y)`.
#[derive(Debug, Clone, Copy)]
pub struct BetaSampler {
    alpha: Option<Gamma<f64>>,
    beta: Option<Gamma<f64>>,
    mean: f64,
}

impl BetaSampler {
    /// Non-positive or NaN shapes are clamped to a tiny positive value.
    pub fn new(alpha: f64, beta: f64) -> Self {
        let alpha = clamp_shape(alpha);
        let beta = clamp_shape(beta);
        Self {
            alpha: Gamma::new(alpha, 1.0).ok(),
            beta: Gamma::new(beta, 1.0).ok(),
            mean: alpha / (alpha + beta),
        }
    }
}

impl Distribution<f64> for BetaSampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (Some(alpha), Some(beta)) = (&self.alpha, &self.beta) else {
            return self.mean;
        };
        let x = alpha.sample(rng);
        let y = beta.sample(rng);
        let total = x + y;
        if total > 0.0 && total.is_finite() {
            x / total
        } else {
            self.mean
        }
    }
}

fn clamp_shape(shape: f64) -> f64 {
    if shape.is_finite() && shape > MIN_SHAPE {
        shape
    } else {
        MIN_SHAPE
    }
}
