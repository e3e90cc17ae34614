use crate::error::DiffusionError;
use continuum_common::Vec3;
use serde::{Deserialize, Serialize};

/// Smallest box length accepted before the grid is considered degenerate.
pub const MIN_BOX_LENGTH: f64 = 1e-15;

/// Flat index of a voxel, `x + y*nx + z*nx*ny`.
///
/// Built only through [`GridGeometry`], which asserts (in debug builds) that the
/// index lies inside the allocated grid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoxelIndex(usize);

impl VoxelIndex {
    #[inline(always)]
    fn new(index: usize, total_boxes: usize) -> Self {
        debug_assert!(
            index < total_boxes,
            "voxel index {} is out of the diffusion grid bounds ({} boxes)",
            index,
            total_boxes
        );
        VoxelIndex(index)
    }

    #[inline(always)]
    pub fn get(self) -> usize {
        self.0
    }
}

/// Integer box coordinates `[ix, iy, iz]`.
pub type BoxCoord = [usize; 3];

/// Origin, extent and box arithmetic of a cubic grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridGeometry {
    /// `[min, max]`, identical on every axis.
    bounds: [f64; 2],
    box_length: f64,
    /// Boxes along each axis (same along x, y and z).
    num_boxes_axis: usize,
    /// True if `num_boxes_axis` is odd. Preserved across growth.
    parity: bool,
}

impl GridGeometry {
    /// Lays out `resolution` sample points over `[min, max]` on each axis.
    ///
    /// Example: bounds 0..40 with resolution 4 gives a box length of 13.3 and
    /// sample points {0, 13.3, 26.6, 39.9}; a box length of 10 would leave the
    /// point at 40 without a box.
    pub fn new(substance: &str, bounds: [f64; 2], resolution: usize) -> Result<Self, DiffusionError> {
        if resolution == 0 {
            return Err(DiffusionError::InvalidResolution {
                substance: substance.to_string(),
                resolution: 0,
            });
        }
        let adjusted_res = if resolution == 1 { 2 } else { resolution }; // avoid division by 0
        let box_length = (bounds[1] - bounds[0]) / (adjusted_res - 1) as f64;
        Self::check_box_length(substance, box_length)?;

        Ok(GridGeometry {
            bounds,
            box_length,
            num_boxes_axis: resolution,
            parity: resolution % 2 == 1,
        })
    }

    pub(crate) fn check_box_length(substance: &str, box_length: f64) -> Result<(), DiffusionError> {
        // Negated comparison so that NaN is rejected too.
        if !(box_length > MIN_BOX_LENGTH) {
            return Err(DiffusionError::InvalidBoxLength {
                substance: substance.to_string(),
                box_length,
            });
        }
        Ok(())
    }

    /// Rebuilds a geometry from persisted values.
    pub(crate) fn from_parts(bounds: [f64; 2], box_length: f64, num_boxes_axis: usize, parity: bool) -> Self {
        GridGeometry { bounds, box_length, num_boxes_axis, parity }
    }

    /// Replaces the extent and box count after growth; the box length never changes.
    pub(crate) fn set_extent(&mut self, bounds: [f64; 2], num_boxes_axis: usize) {
        self.bounds = bounds;
        self.num_boxes_axis = num_boxes_axis;
    }

    /// Box coordinates of a position. No bounds check: positions outside
    /// `[min, max]` yield coordinates outside the grid (negative offsets
    /// saturate to 0).
    #[inline(always)]
    pub fn box_coordinates(&self, position: Vec3) -> BoxCoord {
        let min = self.bounds[0];
        [
            ((position.x - min).floor() / self.box_length).floor() as usize,
            ((position.y - min).floor() / self.box_length).floor() as usize,
            ((position.z - min).floor() / self.box_length).floor() as usize,
        ]
    }

    #[inline(always)]
    pub fn box_index(&self, coord: BoxCoord) -> VoxelIndex {
        let n = self.num_boxes_axis;
        VoxelIndex::new(coord[2] * n * n + coord[1] * n + coord[0], self.total_boxes())
    }

    /// Box index of the voxel containing `position`.
    #[inline(always)]
    pub fn box_index_of(&self, position: Vec3) -> VoxelIndex {
        self.box_index(self.box_coordinates(position))
    }

    /// Checked conversion of a raw flat index, for callers that hold one.
    pub fn index(&self, raw: usize) -> Option<VoxelIndex> {
        (raw < self.total_boxes()).then_some(VoxelIndex(raw))
    }

    /// Inverse of [`box_index`](Self::box_index).
    #[inline(always)]
    pub fn coordinates_of(&self, index: usize) -> BoxCoord {
        let n = self.num_boxes_axis;
        [index % n, (index / n) % n, index / (n * n)]
    }

    /// Physical position of a voxel's sample point.
    #[inline(always)]
    pub fn voxel_position(&self, coord: BoxCoord) -> Vec3 {
        let min = self.bounds[0];
        Vec3::new(
            min + coord[0] as f64 * self.box_length,
            min + coord[1] as f64 * self.box_length,
            min + coord[2] as f64 * self.box_length,
        )
    }

    pub fn bounds(&self) -> [f64; 2] {
        self.bounds
    }

    /// `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub fn dimensions(&self) -> [f64; 6] {
        let [min, max] = self.bounds;
        [min, max, min, max, min, max]
    }

    /// Extent of the grid along each axis.
    pub fn grid_size(&self) -> [f64; 3] {
        let len = self.bounds[1] - self.bounds[0];
        [len, len, len]
    }

    pub fn box_length(&self) -> f64 {
        self.box_length
    }

    pub fn box_volume(&self) -> f64 {
        self.box_length * self.box_length * self.box_length
    }

    pub fn num_boxes_axis(&self) -> usize {
        self.num_boxes_axis
    }

    pub fn num_boxes_array(&self) -> [usize; 3] {
        [self.num_boxes_axis; 3]
    }

    pub fn total_boxes(&self) -> usize {
        self.num_boxes_axis * self.num_boxes_axis * self.num_boxes_axis
    }

    pub fn parity(&self) -> bool {
        self.parity
    }
}
