use serde::{Deserialize, Serialize};

/// A snapshot of one substance field at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct FieldSnapshot {
    /// The simulation time at which the snapshot was taken.
    pub time: f64,
    /// The simulation step number.
    pub step: u32,
    pub substance_id: u32,
    pub substance_name: String,
    /// Grid extent as `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub dimensions: [f64; 6],
    pub box_length: f64,
    /// Boxes along each axis (the grid is cubic, so all three match).
    pub num_boxes_axis: [usize; 3],
    /// Sum of all voxel concentrations.
    pub total_concentration: f64,
    /// Flat concentration buffer, index `x + y*nx + z*nx*ny`.
    pub concentrations: Vec<f64>,
    /// Raw (unnormalized) per-voxel gradients, same indexing as `concentrations`.
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "gradients": null
    pub gradients: Option<Vec<[f64; 3]>>,
}
