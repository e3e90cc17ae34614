//! Continuum diffusion engine: scalar concentration fields on growing cubic
//! voxel grids, advanced with an explicit 7-point stencil.

pub mod boundary;
pub mod clamp;
pub mod error;
pub mod field;
pub mod geometry;
pub mod gradient;
pub mod growth;
pub mod initializers;
pub mod simulation;
pub mod solver;
pub mod storage;

pub use boundary::{
    BoundaryCondition, BoundaryMode, BoundaryValue, ClosedEdge, DirichletEdge, EdgeStencil, LeakingEdge, NeumannEdge,
    PeriodicEdge,
};
pub use clamp::ConcentrationClamp;
pub use error::DiffusionError;
pub use field::{Field, FieldState, GRADIENT_EPSILON};
pub use geometry::{GridGeometry, VoxelIndex};
pub use simulation::ContinuumSimulation;
pub use solver::{DiffusionSolver, STABILITY_LIMIT};

pub use continuum_common::{DiffusionMethod, FieldParams, FieldSnapshot, Vec3};
