//! Resource fluctuation
//!
//! Every Active entity reports usage that wanders around its nominal value.
//! Factors are drawn uniformly from `[-p/100, +p/100]` per resource, where `p`
//! is the entity's own fluctuation percent for that resource, and the
//! perturbed value is clamped into `[0, capacity]`.
//!
//! Randomness is injected through [`FluctuationSource`]. The default source is
//! a seeded `StdRng`, so identical descriptors and seeds reproduce a run
//! exactly.

use dcsim_core::{FluctuationSource, Resource, ResourceVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

/// Seeded uniform fluctuation source
pub struct SeededFluctuation {
    seed: u64,
    rng: StdRng,
}

impl SeededFluctuation {
    pub fn new(seed: u64) -> Self {
        SeededFluctuation {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl FluctuationSource for SeededFluctuation {
    fn factor(&mut self, percent: f64) -> f64 {
        if percent <= 0.0 {
            return 0.0;
        }
        let bound = percent / 100.0;
        Uniform::new_inclusive(-bound, bound).sample(&mut self.rng)
    }

    fn name(&self) -> &str {
        "seeded-uniform"
    }
}

/// Source that never perturbs anything (reported usage equals nominal)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFluctuation;

impl FluctuationSource for NoFluctuation {
    fn factor(&mut self, _percent: f64) -> f64 {
        0.0
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Applies an injected source to entity resource vectors
pub struct FluctuationModel {
    source: Box<dyn FluctuationSource>,
}

impl FluctuationModel {
    pub fn new(source: Box<dyn FluctuationSource>) -> Self {
        FluctuationModel { source }
    }

    /// Model backed by a seeded `StdRng`
    pub fn seeded(seed: u64) -> Self {
        Self::new(Box::new(SeededFluctuation::new(seed)))
    }

    /// Model that reports nominal values unchanged
    pub fn disabled() -> Self {
        Self::new(Box::new(NoFluctuation))
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Draw one factor per resource, in `Resource::ALL` order.
    ///
    /// Percents are clamped to `[0, 100]` before drawing.
    pub fn sample_factors(&mut self, percents: &ResourceVector) -> ResourceVector {
        let mut factors = ResourceVector::ZERO;
        for resource in Resource::ALL {
            let percent = percents.get(resource).clamp(0.0, 100.0);
            *factors.get_mut(resource) = self.source.factor(percent);
        }
        factors
    }
}

/// `clamp(nominal * (1 + factor), 0, capacity)` on every resource
pub fn perturb(nominal: &ResourceVector, factors: &ResourceVector, capacity: &ResourceVector) -> ResourceVector {
    nominal.perturb(factors).clamp_to(capacity)
}
