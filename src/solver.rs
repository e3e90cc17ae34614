use crate::boundary::{
    BoundaryMode, BoundaryValue, ClosedEdge, DirichletEdge, EdgeStencil, LeakingEdge, NeumannEdge, PeriodicEdge,
};
use crate::clamp::ConcentrationClamp;
use crate::error::DiffusionError;
use crate::storage::{AtomicF64, FieldStorage};
use continuum_common::DiffusionMethod;
use log::trace;
use rayon::prelude::*;

/// Rows of one z-slab handed to a single rayon task.
pub const TILE_ROWS: usize = 16;

/// Upper bound on `D * step / box_length^2` for the explicit 7-point scheme.
pub const STABILITY_LIMIT: f64 = 1.0 / 6.0;

/// Rejects parameter sets where the explicit update would oscillate or blow up.
pub fn check_stability(
    substance: &str,
    diffusion_coefficient: f64,
    step: f64,
    box_length: f64,
) -> Result<(), DiffusionError> {
    let ratio = diffusion_coefficient * step / (box_length * box_length);
    // Negated so a NaN ratio fails as well.
    if !(ratio < STABILITY_LIMIT) {
        return Err(DiffusionError::Unstable {
            substance: substance.to_string(),
            diffusion_coefficient,
            step,
            box_length,
        });
    }
    Ok(())
}

fn zero_boundary(_: f64, _: f64, _: f64, _: f64) -> f64 {
    0.0
}

/// Physical rates of one substance.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rates {
    pub diffusion_coefficient: f64,
    pub decay_constant: f64,
}

/// Time integration scheme and edge handling of a field.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DiffusionSolver {
    pub method: DiffusionMethod,
    pub boundary: BoundaryMode,
    /// Sub-steps per call for Runge-Kutta; ignored by Euler.
    pub diffusion_steps: u32,
}

impl DiffusionSolver {
    pub fn new(method: DiffusionMethod, boundary: BoundaryMode, diffusion_steps: u32) -> Self {
        DiffusionSolver { method, boundary, diffusion_steps }
    }

    /// Length of one stencil application for a call with timestep `dt`.
    pub fn step_size(&self, dt: f64) -> f64 {
        match self.method {
            DiffusionMethod::Euler => dt,
            DiffusionMethod::RungeKutta => dt / self.diffusion_steps.max(1) as f64,
        }
    }

    pub fn needs_midpoint(&self) -> bool {
        self.method == DiffusionMethod::RungeKutta
    }

    /// Advances `storage` by `dt` on a cubic grid of `n` boxes per axis.
    /// Every sweep reads the current buffer, writes the next buffer, and the
    /// buffers are swapped once the sweep has finished.
    ///
    /// `boundary_value` feeds Dirichlet and Neumann edges; without one they
    /// evaluate to zero everywhere.
    #[allow(clippy::too_many_arguments)]
    pub fn advance(
        &self,
        storage: &mut FieldStorage,
        n: usize,
        box_length: f64,
        rates: Rates,
        clamp: ConcentrationClamp,
        dt: f64,
        boundary_value: Option<BoundaryValue<'_>>,
    ) {
        let value = boundary_value.unwrap_or(BoundaryValue {
            function: &zero_boundary,
            origin: 0.0,
            box_length,
            time: 0.0,
        });
        match self.boundary {
            BoundaryMode::Closed => self.advance_with(&ClosedEdge, storage, n, box_length, rates, clamp, dt),
            BoundaryMode::Leaking => self.advance_with(&LeakingEdge, storage, n, box_length, rates, clamp, dt),
            BoundaryMode::Periodic => self.advance_with(&PeriodicEdge, storage, n, box_length, rates, clamp, dt),
            BoundaryMode::Dirichlet => {
                self.advance_with(&DirichletEdge(value), storage, n, box_length, rates, clamp, dt)
            }
            BoundaryMode::Neumann => self.advance_with(&NeumannEdge(value), storage, n, box_length, rates, clamp, dt),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn advance_with<E: EdgeStencil>(
        &self,
        edge: &E,
        storage: &mut FieldStorage,
        n: usize,
        box_length: f64,
        rates: Rates,
        clamp: ConcentrationClamp,
        dt: f64,
    ) {
        let h = self.step_size(dt);
        let factor = rates.diffusion_coefficient * h / (box_length * box_length);
        let retain = 1.0 - rates.decay_constant * h;

        match self.method {
            DiffusionMethod::Euler => {
                let (current, next, _) = storage.sweep_buffers();
                sweep(
                    edge,
                    n,
                    current,
                    next,
                    |out, c, lap| out.set(clamp.apply(c * retain + factor * lap)),
                    |out, value| out.set(clamp.apply(value)),
                );
                storage.swap_buffers();
            }
            DiffusionMethod::RungeKutta => {
                let half = 0.5 * factor;
                for sub_step in 0..self.diffusion_steps {
                    trace!("Runge-Kutta sub-step {}/{} (h = {})", sub_step + 1, self.diffusion_steps, h);
                    // Stage 1: half-step estimate
                    {
                        let (current, _, midpoint) = storage.sweep_buffers();
                        sweep(edge, n, current, midpoint, |out, c, lap| *out = c + half * lap, |out, value| {
                            *out = value
                        });
                    }
                    // Stage 2: the second slope is evaluated on the current buffer
                    let (current, next, _) = storage.sweep_buffers();
                    sweep(
                        edge,
                        n,
                        current,
                        next,
                        |out, c, lap| out.set(clamp.apply(c * retain + factor * lap)),
                        |out, value| out.set(clamp.apply(value)),
                    );
                    storage.swap_buffers();
                }
            }
        }
    }
}

/// Visits every voxel of an `n`^3 grid, handing `write` the output slot, the
/// voxel's current value and the sum of `(neighbour - value)` over its six
/// face neighbours. Voxels the edge pins go to `pin` instead.
///
/// Work is split into z-slabs and then into tiles of [`TILE_ROWS`] rows; each
/// task owns a disjoint piece of `out` and only reads `current`.
fn sweep<E, T, W, P>(edge: &E, n: usize, current: &[AtomicF64], out: &mut [T], write: W, pin: P)
where
    E: EdgeStencil,
    T: Send,
    W: Fn(&mut T, f64, f64) + Sync,
    P: Fn(&mut T, f64) + Sync,
{
    if n == 0 {
        return;
    }
    let slab_len = n * n;

    out.par_chunks_mut(slab_len).enumerate().for_each(|(z, slab)| {
        let [z_back, z_front] = edge.pair(z, n);
        slab.par_chunks_mut(n * TILE_ROWS).enumerate().for_each(|(tile, rows)| {
            for (row_in_tile, row) in rows.chunks_mut(n).enumerate() {
                let y = tile * TILE_ROWS + row_in_tile;
                let [y_back, y_front] = edge.pair(y, n);
                let row_start = z * slab_len + y * n;
                for (x, slot) in row.iter_mut().enumerate() {
                    let at = [x, y, z];
                    if let Some(value) = edge.pinned(at, n) {
                        pin(slot, value);
                        continue;
                    }
                    let [x_back, x_front] = edge.pair(x, n);
                    let c = current[row_start + x].load();
                    let read = |neighbour: Option<usize>| {
                        neighbour.map_or_else(|| edge.outside(c, at), |idx| current[idx].load())
                    };
                    let neighbours = read(x_back.map(|i| row_start + i))
                        + read(x_front.map(|i| row_start + i))
                        + read(y_back.map(|j| z * slab_len + j * n + x))
                        + read(y_front.map(|j| z * slab_len + j * n + x))
                        + read(z_back.map(|k| k * slab_len + y * n + x))
                        + read(z_front.map(|k| k * slab_len + y * n + x));
                    write(slot, c, neighbours - 6.0 * c);
                }
            }
        });
    });
}
