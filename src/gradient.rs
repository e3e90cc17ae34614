use crate::storage::AtomicF64;
use continuum_common::Vec3;
use rayon::prelude::*;

/// Difference quotient along one axis at coordinate `i` of `n`.
///
/// Central difference in the interior; at the faces the voxel two steps
/// inward is used so the spacing stays `2 * box_length`.
#[inline(always)]
fn axis_difference(i: usize, n: usize, inv_2_box_length: f64, value: impl Fn(usize) -> f64) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => (value(1) - value(0)) * 2.0 * inv_2_box_length, // only one spacing available
        _ if i == 0 => (value(2) - value(0)) * inv_2_box_length,
        _ if i == n - 1 => (value(n - 1) - value(n - 3)) * inv_2_box_length,
        _ => (value(i + 1) - value(i - 1)) * inv_2_box_length,
    }
}

/// Fills `gradients` with the raw concentration gradient of an `n`^3 grid.
pub fn compute_gradients(n: usize, box_length: f64, current: &[AtomicF64], gradients: &mut [Vec3]) {
    let slab_len = n * n;
    // Precompute inverse spacing.
    let inv_2_box_length = 0.5 / box_length;
    let get_c = |x: usize, y: usize, z: usize| -> f64 {
        current.get(z * slab_len + y * n + x).map_or(0.0, AtomicF64::load)
    };

    gradients
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, grad_out)| {
            let x = idx % n;
            let y = (idx / n) % n;
            let z = idx / slab_len;

            *grad_out = Vec3::new(
                axis_difference(x, n, inv_2_box_length, |i| get_c(i, y, z)),
                axis_difference(y, n, inv_2_box_length, |i| get_c(x, i, z)),
                axis_difference(z, n, inv_2_box_length, |i| get_c(x, y, i)),
            );
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FieldStorage;

    fn filled(n: usize, f: impl Fn(usize, usize, usize) -> f64) -> FieldStorage {
        let mut storage = FieldStorage::new(n * n * n, false);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    storage.set(z * n * n + y * n + x, f(x, y, z));
                }
            }
        }
        storage
    }

    #[test]
    fn linear_ramp_has_constant_gradient() {
        let n = 6;
        let mut storage = filled(n, |x, _, _| 3.0 * x as f64);
        let (current, gradients) = storage.gradient_buffers();
        // box length 2: slope 3 per box is 1.5 per unit length
        compute_gradients(n, 2.0, current, gradients);
        for g in storage.gradients() {
            assert!((g.x - 1.5).abs() < 1e-12);
            assert_eq!(g.y, 0.0);
            assert_eq!(g.z, 0.0);
        }
    }

    #[test]
    fn descending_ramp_points_backwards() {
        let n = 4;
        let mut storage = filled(n, |_, _, z| 10.0 - z as f64);
        let (current, gradients) = storage.gradient_buffers();
        compute_gradients(n, 1.0, current, gradients);
        assert!(storage.gradients().iter().all(|g| (g.z + 1.0).abs() < 1e-12));
    }

    #[test]
    fn edges_use_one_sided_differences() {
        let n = 4;
        // Quadratic along y: c = y^2 -> {0, 1, 4, 9}
        let mut storage = filled(n, |_, y, _| (y * y) as f64);
        let (current, gradients) = storage.gradient_buffers();
        compute_gradients(n, 1.0, current, gradients);
        let g = storage.gradients();
        assert!((g[0].y - 2.0).abs() < 1e-12); // (4 - 0) / 2
        assert!((g[n].y - 2.0).abs() < 1e-12); // (4 - 0) / 2
        assert!((g[2 * n].y - 4.0).abs() < 1e-12); // (9 - 1) / 2
        assert!((g[3 * n].y - 4.0).abs() < 1e-12); // (9 - 1) / 2
    }

    #[test]
    fn small_axes_fall_back() {
        let mut storage = filled(2, |x, _, _| x as f64);
        let (current, gradients) = storage.gradient_buffers();
        compute_gradients(2, 0.5, current, gradients);
        assert!(storage.gradients().iter().all(|g| (g.x - 2.0).abs() < 1e-12));

        let mut single = filled(1, |_, _, _| 7.0);
        let (current, gradients) = single.gradient_buffers();
        compute_gradients(1, 1.0, current, gradients);
        assert_eq!(single.gradients()[0], Vec3::zero());
    }
}
