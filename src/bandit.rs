// =============================================================================
// NIGPosterior + ThompsonSampler — per-trader skill posterior
// =============================================================================
//
// Conjugate Normal-Inverse-Gamma update over a stream of winsorized,
// per-episode R observations. `sample` draws a plausible mean skill from
// the posterior (Thompson sampling); the deterministic variant takes an
// explicit seed so replays are bit-reproducible.
// =============================================================================

use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{InverseGamma, Normal};

/// Normal-Inverse-Gamma posterior over a trader's per-episode skill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NigPosterior {
    pub m: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl NigPosterior {
    /// Prior per §3: (m=0, κ=1, α=3, β=1).
    pub fn prior() -> Self {
        NigPosterior {
            m: 0.0,
            kappa: 1.0,
            alpha: 3.0,
            beta: 1.0,
        }
    }

    /// Conjugate update with a single observation `x` (the winsorized,
    /// [-3,+3]-clamped R of a just-closed episode).
    pub fn update(&self, x: f64) -> Self {
        let kappa_new = self.kappa + 1.0;
        let m_new = (self.kappa * self.m + x) / kappa_new;
        let alpha_new = self.alpha + 0.5;
        let beta_new = self.beta + (self.kappa / (2.0 * kappa_new)) * (x - self.m).powi(2);
        NigPosterior {
            m: m_new,
            kappa: kappa_new,
            alpha: alpha_new,
            beta: beta_new,
        }
    }

    /// Count of observations absorbed since the prior.
    pub fn effective_samples(&self) -> f64 {
        self.kappa - 1.0
    }

    /// Posterior variance of μ; infinite when α≤1 (undefined second moment).
    pub fn posterior_variance(&self) -> f64 {
        if self.alpha <= 1.0 {
            f64::INFINITY
        } else {
            self.beta / (self.kappa * (self.alpha - 1.0))
        }
    }

    /// Confidence-derived trader weight, distinct from the consensus vote
    /// weight (§9): `w = κ/(κ+10)`.
    pub fn trader_weight(&self) -> f64 {
        self.kappa / (self.kappa + 10.0)
    }

    /// Draw `(mu, sigma)` from the posterior using the given RNG: σ² from
    /// Inverse-Gamma(α,β), then μ from N(m, σ²/κ).
    fn draw(&self, rng: &mut impl Rng) -> (f64, f64) {
        let ig = InverseGamma::new(self.alpha, self.beta).expect("alpha,beta > 0 by construction");
        let sigma_sq = ig.sample(rng);
        let sigma = sigma_sq.sqrt().max(1e-12);
        let normal = Normal::new(self.m, sigma / self.kappa.sqrt()).expect("sigma > 0");
        let mu = normal.sample(rng);
        (mu, sigma)
    }

    /// Random Thompson draw of μ using the process-wide RNG.
    pub fn sample(&self) -> f64 {
        let mut rng = rand::thread_rng();
        self.draw(&mut rng).0
    }

    /// Deterministic Thompson draw of μ from an explicit 64-bit seed.
    pub fn sample_seeded(&self, seed: u64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.draw(&mut rng).0
    }

    /// `μ/σ` from a deterministic draw — a Sharpe-like score.
    pub fn sample_sharpe_seeded(&self, seed: u64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (mu, sigma) = self.draw(&mut rng);
        mu / sigma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_moves_mean_toward_observation() {
        let prior = NigPosterior::prior();
        let posterior = prior.update(1.0);
        assert!(posterior.m > prior.m);
        assert_eq!(posterior.kappa, 2.0);
        assert_eq!(posterior.alpha, 3.5);
    }

    #[test]
    fn effective_samples_tracks_observation_count() {
        let mut p = NigPosterior::prior();
        assert_eq!(p.effective_samples(), 0.0);
        for x in [0.5, -0.2, 1.1] {
            p = p.update(x);
        }
        assert_eq!(p.effective_samples(), 3.0);
    }

    #[test]
    fn update_is_associative_for_independent_observations() {
        let prior = NigPosterior::prior();
        let ab = prior.update(0.7).update(-0.3);
        let ba = prior.update(-0.3).update(0.7);
        assert!((ab.m - ba.m).abs() < 1e-9);
        assert!((ab.kappa - ba.kappa).abs() < 1e-9);
        assert!((ab.alpha - ba.alpha).abs() < 1e-9);
        assert!((ab.beta - ba.beta).abs() < 1e-9);
    }

    #[test]
    fn seeded_sample_is_deterministic() {
        let p = NigPosterior::prior().update(0.8).update(1.2);
        let a = p.sample_seeded(42);
        let b = p.sample_seeded(42);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_usually_differ() {
        let p = NigPosterior::prior().update(0.8).update(1.2);
        let a = p.sample_seeded(1);
        let b = p.sample_seeded(2);
        assert_ne!(a, b);
    }

    #[test]
    fn trader_weight_increases_with_kappa() {
        let low = NigPosterior::prior();
        let high = NigPosterior {
            kappa: 40.0,
            ..NigPosterior::prior()
        };
        assert!(high.trader_weight() > low.trader_weight());
        assert!(high.trader_weight() < 1.0);
    }

    #[test]
    fn posterior_variance_infinite_below_alpha_one() {
        let p = NigPosterior {
            alpha: 0.5,
            ..NigPosterior::prior()
        };
        assert!(p.posterior_variance().is_infinite());
    }
}
