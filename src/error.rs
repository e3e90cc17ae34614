use thiserror::Error;

/// Fatal conditions raised by the diffusion engine.
///
/// None of these are retried or corrected silently: a field that reports one of
/// them is misconfigured, and continuing would change simulation results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiffusionError {
    #[error("substance '{substance}': resolution must be at least 1 (got {resolution})")]
    InvalidResolution { substance: String, resolution: i64 },

    #[error("substance '{substance}': the number of diffusion steps must be at least 1")]
    InvalidDiffusionSteps { substance: String },

    #[error("substance '{substance}': box length {box_length} is (close to) zero; check the grid bounds and resolution")]
    InvalidBoxLength { substance: String, box_length: f64 },

    #[error("substance '{substance}': invalid {name} ({value})")]
    InvalidParameter { substance: String, name: &'static str, value: f64 },

    #[error(
        "substance '{substance}': parameters result in unphysical behavior \
         (diffusion coefficient = {diffusion_coefficient}, step = {step}, box length = {box_length}); \
         D*dt/h^2 must stay below 1/6"
    )]
    Unstable { substance: String, diffusion_coefficient: f64, step: f64, box_length: f64 },

    #[error("substance '{substance}': the grid tried to shrink from {old_boxes} to {new_boxes} boxes per axis")]
    Shrink { substance: String, old_boxes: usize, new_boxes: usize },

    #[error("substance '{substance}': the grid has not been initialized")]
    NotInitialized { substance: String },

    #[error("substance '{substance}': cannot restore field state: {reason}")]
    Deserialize { substance: String, reason: String },
}
