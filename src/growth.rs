use crate::error::DiffusionError;
use crate::geometry::GridGeometry;
use crate::storage::FieldStorage;
use continuum_common::Vec3;
use log::info;

/// Remainders below this are treated as an exact multiple of the box length.
const DIVISIBILITY_EPSILON: f64 = 1e-9;

/// Target extent of a grid after growth.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrowthPlan {
    pub bounds: [f64; 2],
    pub num_boxes_axis: usize,
}

/// Works out the grid that covers `[new_min, new_max]` with the current box
/// length. Returns `None` if that grid would not hold more boxes than the
/// current one, in which case the geometry stays as it is.
pub fn plan_growth(geometry: &GridGeometry, new_min: f64, new_max: f64) -> Option<GrowthPlan> {
    let box_length = geometry.box_length();
    let mut bounds = [new_min, new_max];

    // Extend max so the extent is a whole number of boxes.
    let remainder = (new_max - new_min) % box_length;
    if remainder > DIVISIBILITY_EPSILON && box_length - remainder > DIVISIBILITY_EPSILON {
        bounds[1] += box_length - remainder;
    }

    let boxes = ((bounds[1] - bounds[0]) / box_length - DIVISIBILITY_EPSILON).ceil();
    if !(boxes > geometry.num_boxes_axis() as f64) {
        return None;
    }
    let mut num_boxes_axis = boxes as usize;

    // Keep the parity so old data lands symmetrically. Only the extension of
    // max can flip it, so the compensating box goes on the min side.
    if (num_boxes_axis % 2 == 1) != geometry.parity() {
        bounds[0] -= box_length;
        num_boxes_axis += 1;
    }

    Some(GrowthPlan { bounds, num_boxes_axis })
}

/// Reallocates `storage` for `plan` and copies the old data into the middle of
/// the new grid. New voxels start at zero.
pub fn apply_growth(
    substance: &str,
    geometry: &mut GridGeometry,
    storage: &mut FieldStorage,
    plan: GrowthPlan,
) -> Result<(), DiffusionError> {
    let old_n = geometry.num_boxes_axis();
    let new_n = plan.num_boxes_axis;
    if new_n < old_n {
        return Err(DiffusionError::Shrink {
            substance: substance.to_string(),
            old_boxes: old_n,
            new_boxes: new_n,
        });
    }

    info!(
        "Growing '{}' from {}^3 to {}^3 boxes, bounds [{:.3}, {:.3}].",
        substance, old_n, new_n, plan.bounds[0], plan.bounds[1]
    );

    let (old_values, old_gradients) = storage.reallocate(new_n * new_n * new_n);
    geometry.set_extent(plan.bounds, new_n);
    copy_old_data(storage, new_n, &old_values, &old_gradients, old_n);
    Ok(())
}

/// Strided copy of an `old_n`^3 block into the centre of an `new_n`^3 grid.
fn copy_old_data(storage: &mut FieldStorage, new_n: usize, old_values: &[f64], old_gradients: &[Vec3], old_n: usize) {
    let off = (new_n - old_n) / 2;
    let new_slab = new_n * new_n;
    let old_slab = old_n * old_n;

    for k in 0..old_n {
        for j in 0..old_n {
            let dst_row = (k + off) * new_slab + (j + off) * new_n + off;
            let src_row = k * old_slab + j * old_n;
            for i in 0..old_n {
                storage.set(dst_row + i, old_values[src_row + i]);
            }
            storage.gradients_mut()[dst_row..dst_row + old_n]
                .copy_from_slice(&old_gradients[src_row..src_row + old_n]);
        }
    }
}
