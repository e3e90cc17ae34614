use crate::config::{BoundaryMode, DiffusionMethod};
use serde::{Deserialize, Serialize};

/// Field parameters derived from the configuration, fixed for the lifetime of a field
/// (except the decay constant and thresholds, which the field lets callers change).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldParams {
    // Identity
    pub substance_id: u32,
    pub substance_name: String,

    // Stencil weights [center, -x, +x, -y, +y, -z, +z]
    pub coefficients: [f64; 7],
    pub decay_constant: f64,

    // Grid
    pub resolution: i64, // Sample points per axis; validated by the engine

    // Numerics
    pub boundary: BoundaryMode,
    pub method: DiffusionMethod,
    pub diffusion_steps: u32, // Runge-Kutta sub-steps per call
    pub timestep: f64,        // Simulation dt used for the stability check

    // Clamp
    pub upper_threshold: f64,
    pub lower_threshold: f64,
}

impl FieldParams {
    /// Stencil weights for a scalar diffusion coefficient `dc`.
    pub fn coefficients_from(dc: f64) -> [f64; 7] {
        let side = dc / 6.0;
        [1.0 - dc, side, side, side, side, side, side]
    }

    /// The scalar diffusion coefficient the weights were derived from.
    pub fn diffusion_coefficient(&self) -> f64 {
        1.0 - self.coefficients[0]
    }

    /// Convenience constructor with the defaults used by the configuration file.
    pub fn new(substance_id: u32, substance_name: impl Into<String>, dc: f64, decay: f64, resolution: i64) -> Self {
        FieldParams {
            substance_id,
            substance_name: substance_name.into(),
            coefficients: Self::coefficients_from(dc),
            decay_constant: decay,
            resolution,
            boundary: BoundaryMode::Closed,
            method: DiffusionMethod::Euler,
            diffusion_steps: 1,
            timestep: 0.01,
            upper_threshold: 1e15,
            lower_threshold: 0.0,
        }
    }

    pub fn with_boundary(mut self, boundary: BoundaryMode) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_method(mut self, method: DiffusionMethod, diffusion_steps: u32) -> Self {
        self.method = method;
        self.diffusion_steps = diffusion_steps;
        self
    }

    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn with_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_threshold = lower;
        self.upper_threshold = upper;
        self
    }
}
