//! Seeding functions applied once when a field is created.

use continuum_common::{Axis, InitializerConfig};
use std::f64::consts::PI;

/// A spatial seeding function `f(x, y, z)`.
pub type InitializerFn = Box<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>;

/// Queue of seeding functions waiting for the first initialization.
#[derive(Default)]
pub struct InitializerRegistry {
    queue: Vec<InitializerFn>,
}

impl std::fmt::Debug for InitializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializerRegistry").field("queued", &self.queue.len()).finish()
    }
}

impl InitializerRegistry {
    pub fn push(&mut self, initializer: InitializerFn) {
        self.queue.push(initializer);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Empties the queue, releasing its memory, and returns what was queued.
    pub fn drain(&mut self) -> Vec<InitializerFn> {
        let queued = std::mem::take(&mut self.queue);
        self.queue.shrink_to_fit();
        queued
    }
}

#[inline(always)]
fn coordinate(axis: Axis, x: f64, y: f64, z: f64) -> f64 {
    match axis {
        Axis::X => x,
        Axis::Y => y,
        Axis::Z => z,
    }
}

/// Constant value inside a band `[min, max]` along one axis, zero elsewhere.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Uniform {
    pub min: f64,
    pub max: f64,
    pub value: f64,
    pub axis: Axis,
}

impl Uniform {
    pub fn value_at(&self, x: f64, y: f64, z: f64) -> f64 {
        let c = coordinate(self.axis, x, y, z);
        if c >= self.min && c <= self.max {
            self.value
        } else {
            0.0
        }
    }
}

/// Normal probability density along one axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GaussianBand {
    pub mean: f64,
    pub sigma: f64,
    pub axis: Axis,
}

impl GaussianBand {
    pub fn value_at(&self, x: f64, y: f64, z: f64) -> f64 {
        let d = coordinate(self.axis, x, y, z) - self.mean;
        (-(d * d) / (2.0 * self.sigma * self.sigma)).exp() / (self.sigma * (2.0 * PI).sqrt())
    }
}

/// Poisson probability mass of the coordinate (truncated to an integer)
/// along one axis. Negative coordinates yield zero.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PoissonBand {
    pub lambda: f64,
    pub axis: Axis,
}

impl PoissonBand {
    pub fn value_at(&self, x: f64, y: f64, z: f64) -> f64 {
        let c = coordinate(self.axis, x, y, z);
        if c < 0.0 {
            return 0.0;
        }
        let k = c.trunc() as u64;
        // log space keeps k! from overflowing
        let ln_factorial: f64 = (2..=k).map(|i| (i as f64).ln()).sum();
        (k as f64 * self.lambda.ln() - self.lambda - ln_factorial).exp()
    }
}

/// Builds the seeding function described by a configuration entry.
pub fn from_config(config: &InitializerConfig) -> InitializerFn {
    match *config {
        InitializerConfig::Uniform { min, max, value, axis } => {
            let band = Uniform { min, max, value, axis };
            Box::new(move |x, y, z| band.value_at(x, y, z))
        }
        InitializerConfig::GaussianBand { mean, sigma, axis } => {
            let band = GaussianBand { mean, sigma, axis };
            Box::new(move |x, y, z| band.value_at(x, y, z))
        }
        InitializerConfig::PoissonBand { lambda, axis } => {
            let band = PoissonBand { lambda, axis };
            Box::new(move |x, y, z| band.value_at(x, y, z))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_band_is_inclusive() {
        let band = Uniform { min: 10.0, max: 20.0, value: 3.0, axis: Axis::Y };
        assert_eq!(band.value_at(0.0, 10.0, 0.0), 3.0);
        assert_eq!(band.value_at(0.0, 20.0, 0.0), 3.0);
        assert_eq!(band.value_at(15.0, 9.9, 15.0), 0.0);
    }

    #[test]
    fn gaussian_peaks_at_mean() {
        let band = GaussianBand { mean: 5.0, sigma: 2.0, axis: Axis::X };
        let peak = 1.0 / (2.0 * (2.0 * PI).sqrt());
        assert!((band.value_at(5.0, 0.0, 0.0) - peak).abs() < 1e-12);
        assert!((band.value_at(3.0, 0.0, 0.0) - band.value_at(7.0, 0.0, 0.0)).abs() < 1e-15);
        assert!(band.value_at(6.0, 0.0, 0.0) < peak);
    }

    #[test]
    fn poisson_matches_closed_form() {
        let band = PoissonBand { lambda: 3.0, axis: Axis::Z };
        let expected = |k: i32| 3f64.powi(k) * (-3f64).exp() / (1..=k).product::<i32>() as f64;
        assert!((band.value_at(0.0, 0.0, 0.0) - (-3f64).exp()).abs() < 1e-12);
        assert!((band.value_at(0.0, 0.0, 2.7) - expected(2)).abs() < 1e-12);
        assert!((band.value_at(0.0, 0.0, 5.0) - expected(5)).abs() < 1e-12);
        assert_eq!(band.value_at(0.0, 0.0, -1.0), 0.0);
    }

    #[test]
    fn drain_clears_the_queue() {
        let mut registry = InitializerRegistry::default();
        registry.push(Box::new(|_, _, _| 1.0));
        registry.push(from_config(&InitializerConfig::Uniform { min: 0.0, max: 1.0, value: 2.0, axis: Axis::X }));
        assert_eq!(registry.len(), 2);

        let queued = registry.drain();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1](0.5, 0.0, 0.0), 2.0);
        assert!(registry.is_empty());
    }
}
