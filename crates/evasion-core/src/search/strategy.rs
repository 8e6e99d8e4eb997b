//! Manipulation-vector generation strategies.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Produces the next manipulation vector to evaluate.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// A non-empty vector of at most `n_features` distinct indices drawn from
    /// `active`. `best` is the best vector found so far, if any.
    fn propose(&mut self, active: &[usize], best: Option<&[usize]>, n_features: usize) -> Vec<usize>;
}

/// Selectable strategy names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Uniform sampling without replacement, fresh every iteration.
    #[default]
    Random,
    /// Evolutionary: mutate the current best vector.
    Mutation,
}

impl StrategyKind {
    pub fn build(self, seed: u64) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Random => Box::new(RandomSampling::new(seed)),
            StrategyKind::Mutation => Box::new(BestMutation::new(seed)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Random => f.write_str("random"),
            StrategyKind::Mutation => f.write_str("mutation"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" => Ok(StrategyKind::Random),
            "mutation" | "evolutionary" => Ok(StrategyKind::Mutation),
            other => Err(format!("unknown strategy '{}' (expected random or mutation)", other)),
        }
    }
}

pub struct RandomSampling {
    rng: StdRng,
}

impl RandomSampling {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Strategy for RandomSampling {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(&mut self, active: &[usize], _best: Option<&[usize]>, n_features: usize) -> Vec<usize> {
        let amount = n_features.max(1).min(active.len());
        active.choose_multiple(&mut self.rng, amount).copied().collect()
    }
}

/// Mutates the best vector by one add, drop or swap; samples fresh when there
/// is no best vector yet.
pub struct BestMutation {
    rng: StdRng,
    fallback: RandomSampling,
}

impl BestMutation {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fallback: RandomSampling::new(seed.wrapping_add(1)),
        }
    }
}

impl Strategy for BestMutation {
    fn name(&self) -> &'static str {
        "mutation"
    }

    fn propose(&mut self, active: &[usize], best: Option<&[usize]>, n_features: usize) -> Vec<usize> {
        let limit = n_features.max(1);
        let mut vector: Vec<usize> = match best {
            Some(best) if !best.is_empty() => best
                .iter()
                .copied()
                .filter(|i| active.contains(i))
                .take(limit)
                .collect(),
            _ => Vec::new(),
        };
        if vector.is_empty() {
            return self.fallback.propose(active, None, n_features);
        }

        let outside: Vec<usize> = active.iter().copied().filter(|i| !vector.contains(i)).collect();
        let can_add = vector.len() < limit && !outside.is_empty();
        let can_drop = vector.len() > 1;
        let can_swap = !outside.is_empty();

        match self.rng.gen_range(0..3) {
            0 if can_add => vector.push(outside[self.rng.gen_range(0..outside.len())]),
            1 if can_drop => {
                let at = self.rng.gen_range(0..vector.len());
                vector.remove(at);
            }
            _ if can_swap => {
                let at = self.rng.gen_range(0..vector.len());
                vector[at] = outside[self.rng.gen_range(0..outside.len())];
            }
            _ if can_drop => {
                let at = self.rng.gen_range(0..vector.len());
                vector.remove(at);
            }
            _ => {}
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_valid(vector: &[usize], active: &[usize], n: usize) {
        assert!(!vector.is_empty());
        assert!(vector.len() <= n);
        let unique: HashSet<_> = vector.iter().collect();
        assert_eq!(unique.len(), vector.len());
        assert!(vector.iter().all(|i| active.contains(i)));
    }

    #[test]
    fn test_random_sampling_bounds() {
        let active: Vec<usize> = vec![0, 2, 3, 5, 8, 9, 11];
        let mut strategy = RandomSampling::new(7);
        for _ in 0..50 {
            let v = strategy.propose(&active, None, 4);
            assert_eq!(v.len(), 4);
            assert_valid(&v, &active, 4);
        }
        assert_eq!(strategy.propose(&[1, 2], None, 5).len(), 2);
    }

    #[test]
    fn test_random_sampling_is_seeded() {
        let active: Vec<usize> = (0..30).collect();
        let a: Vec<_> = (0..5).map(|_| RandomSampling::new(42).propose(&active, None, 5)).collect();
        assert!(a.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_mutation_stays_near_best() {
        let active: Vec<usize> = (0..15).collect();
        let best = vec![1, 4, 7];
        let mut strategy = BestMutation::new(3);
        for _ in 0..100 {
            let v = strategy.propose(&active, Some(&best), 5);
            assert_valid(&v, &active, 5);
            let shared = v.iter().filter(|i| best.contains(i)).count();
            assert!(shared >= 2, "mutation changed more than one element: {:?}", v);
        }
    }

    #[test]
    fn test_mutation_without_best_samples() {
        let active: Vec<usize> = (0..10).collect();
        let mut strategy = BestMutation::new(3);
        let v = strategy.propose(&active, None, 3);
        assert_valid(&v, &active, 3);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("random".parse::<StrategyKind>().unwrap(), StrategyKind::Random);
        assert_eq!("Mutation".parse::<StrategyKind>().unwrap(), StrategyKind::Mutation);
        assert!("bayes".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::Mutation.build(0).name(), "mutation");
    }
}
