//! Thompson Sampling over arms
//!
//! Rewards live in [0, 1], so fractional successes are allowed:
//! `successes = total_reward`, `failures = n - total_reward`. The
//! exploration temperature shapes the Beta parameters before sampling,
//! never the drawn sample: `α = (α₀ - 1)/T + 1`, `β = (β₀ - 1)/T + 1`
//! with `α₀ = successes + 1`, `β₀ = failures + 1`. `T > 1` flattens the
//! posterior, `T < 1` sharpens it.

use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::core::types::{Arm, ArmStats};

/// Shaped Beta parameters for one arm
pub fn shaped_beta_params(stats: &ArmStats, temperature: f64) -> (f64, f64) {
    let temperature = if temperature > 0.0 { temperature } else { 1.0 };
    let successes = stats.total_reward.max(0.0);
    let failures = (stats.n as f64 - stats.total_reward).max(0.0);
    (successes / temperature + 1.0, failures / temperature + 1.0)
}

/// Draw one shaped Beta sample for an arm
pub fn sample_posterior<R: Rng + ?Sized>(
    stats: &ArmStats,
    temperature: f64,
    rng: &mut R,
) -> f64 {
    let (alpha, beta) = shaped_beta_params(stats, temperature);
    match Beta::new(alpha, beta) {
        Ok(distribution) => distribution.sample(rng),
        // alpha/beta are always >= 1 here; this arm is skipped if not
        Err(_) => 0.0,
    }
}

/// Pick the arm with the maximum posterior sample
pub fn select_arm<'a, R: Rng + ?Sized>(
    arms: &'a [Arm],
    temperature: f64,
    rng: &mut R,
) -> Option<&'a Arm> {
    arms.iter()
        .map(|arm| (arm, sample_posterior(&arm.stats, temperature, rng)))
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(arm, _)| arm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use uuid::Uuid;

    fn arm(n: u64, total_reward: f64) -> Arm {
        Arm {
            id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            params: Default::default(),
            stats: ArmStats {
                n,
                mean: if n > 0 { total_reward / n as f64 } else { 0.0 },
                n2: 0.0,
                total_reward,
            },
        }
    }

    #[test]
    fn unit_temperature_leaves_the_posterior_unshaped() {
        let stats = ArmStats {
            n: 10,
            mean: 0.7,
            n2: 0.0,
            total_reward: 7.0,
        };
        let (alpha, beta) = shaped_beta_params(&stats, 1.0);
        assert!((alpha - 8.0).abs() < 1e-12);
        assert!((beta - 4.0).abs() < 1e-12);
    }

    #[test]
    fn fresh_arm_at_unit_temperature_is_uniform() {
        let (alpha, beta) = shaped_beta_params(&ArmStats::default(), 1.0);
        assert_eq!((alpha, beta), (1.0, 1.0));

        // Beta(1,1) sample mean sits near 0.5
        let mut rng = StdRng::seed_from_u64(7);
        let mean: f64 = (0..20_000)
            .map(|_| sample_posterior(&ArmStats::default(), 1.0, &mut rng))
            .sum::<f64>()
            / 20_000.0;
        assert!((mean - 0.5).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn high_temperature_flattens_toward_uniform() {
        let stats = ArmStats {
            n: 100,
            mean: 0.9,
            n2: 0.0,
            total_reward: 90.0,
        };
        let (alpha_sharp, beta_sharp) = shaped_beta_params(&stats, 1.0);
        let (alpha_flat, beta_flat) = shaped_beta_params(&stats, 10.0);
        assert!(alpha_flat < alpha_sharp);
        assert!(beta_flat < beta_sharp);
        assert!(alpha_flat >= 1.0 && beta_flat >= 1.0);
    }

    #[test]
    fn single_arm_is_always_selected() {
        let arms = vec![arm(10, 7.0)];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let selected = select_arm(&arms, 1.0, &mut rng).unwrap();
            assert_eq!(selected.id, arms[0].id);
        }
    }

    #[test]
    fn strong_arm_dominates_selection() {
        let strong = arm(50, 48.0);
        let weak = arm(50, 2.0);
        let strong_id = strong.id;
        let arms = vec![weak, strong];
        let mut rng = StdRng::seed_from_u64(42);
        let strong_picks = (0..1000)
            .filter(|_| select_arm(&arms, 1.0, &mut rng).unwrap().id == strong_id)
            .count();
        assert!(strong_picks > 950, "strong arm picked {strong_picks}/1000");
    }
}
