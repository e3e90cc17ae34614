use crate::sim_params::FieldParams;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// Initial cubic bounds of the simulation space and how fast they expand.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub min: f64,
    pub max: f64,
    /// Distance added to each side of the domain every step (0 = static domain).
    #[serde(default)]
    pub growth_per_step: f64,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub dt: f64,
    pub total_steps: u32,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u32,
}

fn default_record_interval() -> u32 {
    10
}

/// How the stencil treats neighbours that fall outside the grid.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Missing neighbours mirror the voxel itself; no flux leaves the grid.
    #[default]
    Closed,
    /// Missing neighbours read as zero; substance flows out of the grid.
    #[serde(alias = "open")]
    Leaking,
    /// Missing neighbours wrap to the opposite face.
    Periodic,
    /// Perimeter voxels are overwritten with the boundary value every step.
    Dirichlet,
    /// The boundary value is the outward flux through each missing face.
    Neumann,
}

impl BoundaryMode {
    /// True for modes that evaluate a boundary value function.
    pub fn uses_boundary_value(self) -> bool {
        matches!(self, BoundaryMode::Dirichlet | BoundaryMode::Neumann)
    }
}

/// Numerical scheme used to advance the field.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffusionMethod {
    #[default]
    #[serde(rename = "euler", alias = "Euler")]
    Euler,
    #[serde(rename = "rk", alias = "RK", alias = "runge_kutta")]
    RungeKutta,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A spatial seeding function, applied once when the field is created.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitializerConfig {
    /// Constant `value` wherever the coordinate along `axis` lies in `[min, max]`.
    Uniform { min: f64, max: f64, value: f64, axis: Axis },
    /// Normal probability density along `axis`.
    GaussianBand { mean: f64, sigma: f64, axis: Axis },
    /// Poisson probability mass of the (truncated) coordinate along `axis`.
    PoissonBand { lambda: f64, axis: Axis },
}

// Parameters for one substance, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SubstanceConfig {
    pub id: u32,
    pub name: String,
    pub diffusion_coefficient: f64,
    #[serde(default)]
    pub decay_constant: f64,
    #[serde(default = "default_resolution")]
    pub resolution: i64,
    #[serde(default)]
    pub boundary: BoundaryMode,
    /// Constant boundary value for `dirichlet` and `neumann` edges.
    #[serde(default)]
    pub boundary_value: f64,
    #[serde(default)]
    pub method: DiffusionMethod,
    #[serde(default = "default_diffusion_steps")]
    pub diffusion_steps: u32,
    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: f64,
    #[serde(default)]
    pub lower_threshold: f64,
    #[serde(default)]
    pub initializers: Vec<InitializerConfig>,
}

fn default_resolution() -> i64 {
    11
}

fn default_diffusion_steps() -> u32 {
    1
}

fn default_upper_threshold() -> f64 {
    1e15
}

// Random point secretors that exercise the agent-facing write path.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SourceConfig {
    pub count: u32,
    pub seed: u64,
    /// Amount secreted per source per step.
    pub rate: f64,
    /// Standard deviation of the per-step position jitter.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig { count: 0, seed: 0, rate: 0.0, jitter: 0.0 }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_snapshots: bool,
    #[serde(default)]
    pub save_final_csv: bool,
    #[serde(default)]
    pub save_gradients_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

fn default_true() -> bool {
    true
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    pub substances: Vec<SubstanceConfig>,
    #[serde(default)]
    pub sources: SourceConfig,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file '{}'", path_ref.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid configuration in '{}'", path_ref.display()))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig =
            toml::from_str(config_str).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.domain.max > self.domain.min) {
            anyhow::bail!(
                "domain max ({}) must be greater than domain min ({}).",
                self.domain.max,
                self.domain.min
            );
        }
        if self.domain.growth_per_step < 0.0 {
            anyhow::bail!("growth_per_step must not be negative.");
        }
        if !(self.timing.dt > 0.0) {
            anyhow::bail!("dt must be positive.");
        }
        if self.substances.is_empty() {
            anyhow::bail!("at least one [[substances]] entry is required.");
        }

        let mut seen = HashSet::new();
        for s in &self.substances {
            if !seen.insert(s.id) {
                anyhow::bail!("substance id {} is used more than once.", s.id);
            }
            if s.resolution <= 0 {
                anyhow::bail!("substance '{}': resolution must be positive.", s.name);
            }
            if s.diffusion_steps == 0 {
                anyhow::bail!("substance '{}': diffusion_steps must be at least 1.", s.name);
            }
            if !s.boundary_value.is_finite() {
                anyhow::bail!("substance '{}': boundary_value must be finite.", s.name);
            }
            if s.lower_threshold > s.upper_threshold {
                anyhow::bail!(
                    "substance '{}': lower_threshold exceeds upper_threshold.",
                    s.name
                );
            }
            for initializer in &s.initializers {
                match *initializer {
                    InitializerConfig::GaussianBand { sigma, .. } if !(sigma > 0.0) => {
                        anyhow::bail!("substance '{}': gaussian_band sigma must be positive.", s.name);
                    }
                    InitializerConfig::PoissonBand { lambda, .. } if !(lambda > 0.0) => {
                        anyhow::bail!("substance '{}': poisson_band lambda must be positive.", s.name);
                    }
                    _ => {}
                }
            }
        }
        // Stability is checked by the engine once the box length is known.
        Ok(())
    }

    /// Derived per-field parameters for the substance with the given id.
    pub fn field_params(&self, id: u32) -> Option<FieldParams> {
        self.substances
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.field_params(self.timing.dt))
    }
}

impl SubstanceConfig {
    /// Converts the configuration into the parameters used by a field at runtime.
    pub fn field_params(&self, dt: f64) -> FieldParams {
        FieldParams {
            substance_id: self.id,
            substance_name: self.name.clone(),
            coefficients: FieldParams::coefficients_from(self.diffusion_coefficient),
            decay_constant: self.decay_constant,
            resolution: self.resolution,
            boundary: self.boundary,
            method: self.method,
            diffusion_steps: self.diffusion_steps,
            upper_threshold: self.upper_threshold,
            lower_threshold: self.lower_threshold,
            timestep: dt,
        }
    }
}
