//! Edge handling for the 7-point stencil.
//!
//! Every boundary mode answers one question: which voxel along an axis stands
//! in for the neighbour of `i` one step backward or forward? The sweep in
//! [`crate::solver`] is generic over this answer, so all modes share a single
//! update routine.

pub use continuum_common::BoundaryMode;

/// Boundary value `f(x, y, z, t)` used by Dirichlet and Neumann edges.
pub type BoundaryFn = dyn Fn(f64, f64, f64, f64) -> f64 + Send + Sync;

/// Owned boundary value function, as stored on a field.
pub type BoundaryValueFn = Box<BoundaryFn>;

/// Neighbour lookup along one axis of `n` boxes.
pub trait EdgeStencil: Sync {
    /// Coordinate of the neighbour of `i` (backward if `forward` is false), or
    /// `None` if that neighbour lies outside the grid.
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize>;

    /// Backward and forward neighbours of `i`.
    #[inline(always)]
    fn pair(&self, i: usize, n: usize) -> [Option<usize>; 2] {
        [self.neighbour(i, n, false), self.neighbour(i, n, true)]
    }

    /// Value read in place of a neighbour outside the grid, for the voxel at
    /// box coordinates `at` holding `c`.
    #[inline(always)]
    fn outside(&self, _c: f64, _at: [usize; 3]) -> f64 {
        0.0
    }

    /// Value imposed on the voxel at `at`, bypassing the stencil.
    #[inline(always)]
    fn pinned(&self, _at: [usize; 3], _n: usize) -> Option<f64> {
        None
    }
}

#[inline(always)]
fn interior(i: usize, n: usize, forward: bool) -> Option<usize> {
    if forward {
        (i + 1 < n).then(|| i + 1)
    } else {
        i.checked_sub(1)
    }
}

/// A missing neighbour is the voxel itself: its term `c - c` vanishes, so
/// nothing crosses the boundary.
#[derive(Debug, Copy, Clone, Default)]
pub struct ClosedEdge;

impl EdgeStencil for ClosedEdge {
    #[inline(always)]
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize> {
        Some(interior(i, n, forward).unwrap_or(i))
    }
}

/// A missing neighbour reads as zero concentration, so substance at the
/// perimeter drains out of the grid.
#[derive(Debug, Copy, Clone, Default)]
pub struct LeakingEdge;

impl EdgeStencil for LeakingEdge {
    #[inline(always)]
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize> {
        interior(i, n, forward)
    }
}

/// A missing neighbour is the voxel on the opposite face.
#[derive(Debug, Copy, Clone, Default)]
pub struct PeriodicEdge;

impl EdgeStencil for PeriodicEdge {
    #[inline(always)]
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize> {
        Some(match interior(i, n, forward) {
            Some(j) => j,
            None if forward => 0,
            None => n - 1,
        })
    }
}

/// Boundary value function of a field, if one has been set. Dirichlet and
/// Neumann edges without one evaluate to zero.
#[derive(Default)]
pub struct BoundaryCondition(Option<BoundaryValueFn>);

impl std::fmt::Debug for BoundaryCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryCondition").field("set", &self.0.is_some()).finish()
    }
}

impl BoundaryCondition {
    pub fn set(&mut self, function: BoundaryValueFn) {
        self.0 = Some(function);
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Evaluates the function, or returns zero if none is set.
    pub fn evaluate(&self, x: f64, y: f64, z: f64, t: f64) -> f64 {
        self.0.as_ref().map_or(0.0, |function| function(x, y, z, t))
    }

    /// Evaluation context for one sweep over a grid whose lower corner is
    /// `origin`.
    pub fn at(&self, origin: f64, box_length: f64, time: f64) -> Option<BoundaryValue<'_>> {
        self.0.as_deref().map(|function| BoundaryValue { function, origin, box_length, time })
    }
}

/// Where and when a boundary value function is evaluated during one sweep.
#[derive(Clone, Copy)]
pub struct BoundaryValue<'a> {
    pub function: &'a BoundaryFn,
    /// Lower corner of the grid on every axis.
    pub origin: f64,
    pub box_length: f64,
    /// Simulated time at the start of the step.
    pub time: f64,
}

impl BoundaryValue<'_> {
    #[inline(always)]
    fn at(&self, at: [usize; 3]) -> f64 {
        let position = |i: usize| self.origin + i as f64 * self.box_length;
        (self.function)(position(at[0]), position(at[1]), position(at[2]), self.time)
    }
}

/// Perimeter voxels take the boundary value; interior voxels follow the
/// regular stencil and read the perimeter as it was before the step.
#[derive(Clone, Copy)]
pub struct DirichletEdge<'a>(pub BoundaryValue<'a>);

impl EdgeStencil for DirichletEdge<'_> {
    #[inline(always)]
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize> {
        interior(i, n, forward)
    }

    #[inline(always)]
    fn pinned(&self, at: [usize; 3], n: usize) -> Option<f64> {
        at.iter().any(|&i| i == 0 || i + 1 == n).then(|| self.0.at(at))
    }
}

/// The boundary value is a flux through each missing face: the missing
/// neighbour reads as `c - box_length * g(x, y, z, t)`. With `g = 0` this is
/// the closed edge.
#[derive(Clone, Copy)]
pub struct NeumannEdge<'a>(pub BoundaryValue<'a>);

impl EdgeStencil for NeumannEdge<'_> {
    #[inline(always)]
    fn neighbour(&self, i: usize, n: usize, forward: bool) -> Option<usize> {
        interior(i, n, forward)
    }

    #[inline(always)]
    fn outside(&self, c: f64, at: [usize; 3]) -> f64 {
        c - self.0.box_length * self.0.at(at)
    }
}
