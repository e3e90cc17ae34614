pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    Axis, BoundaryMode, DiffusionMethod, DomainConfig, InitializerConfig, OutputConfig,
    SimulationConfig, SourceConfig, SubstanceConfig, TimingConfig,
};
pub use sim_params::FieldParams;
pub use snapshot::FieldSnapshot;
pub use vecmath::{clamp, Vec3};
