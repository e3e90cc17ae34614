use crate::boundary::{BoundaryCondition, BoundaryMode};
use crate::clamp::ConcentrationClamp;
use crate::error::DiffusionError;
use crate::geometry::{GridGeometry, VoxelIndex};
use crate::gradient::compute_gradients;
use crate::growth::{apply_growth, plan_growth};
use crate::initializers::{self, InitializerFn, InitializerRegistry};
use crate::solver::{check_stability, DiffusionSolver, Rates};
use crate::storage::FieldStorage;
use continuum_common::{DiffusionMethod, FieldParams, FieldSnapshot, InitializerConfig, Vec3};
use log::{debug, error, info, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Gradients with a magnitude at or below this are reported as zero.
pub const GRADIENT_EPSILON: f64 = 1e-10;

/// Persisted form of a [`Field`], written by [`Field::to_state`] and read back
/// by [`Field::from_state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub params: FieldParams,
    pub initialized: bool,
    pub bounds: [f64; 2],
    pub box_length: f64,
    pub num_boxes_axis: usize,
    pub parity: bool,
    pub last_dt: f64,
    #[serde(default)]
    pub simulated_time: f64,
    pub concentrations: Vec<f64>,
}

/// Concentration field of one substance on a cubic voxel grid.
#[derive(Debug)]
pub struct Field {
    params: FieldParams,
    geometry: GridGeometry,
    storage: FieldStorage,
    solver: DiffusionSolver,
    clamp: ConcentrationClamp,
    initializers: InitializerRegistry,
    boundary: BoundaryCondition,

    // --- State Flags ---
    initialized: bool,
    is_fixed: bool,         // Cached; recomputed when the decay constant changes
    gradient_computed: bool, // Lets fixed fields skip repeated gradient passes
    last_dt: f64,
    simulated_time: f64, // Sum of all diffuse timesteps; fed to the boundary value function
}

fn invalid(substance: &str, name: &'static str, value: f64) -> DiffusionError {
    DiffusionError::InvalidParameter { substance: substance.to_string(), name, value }
}

/// Checks every parameter that does not depend on the grid extent.
fn validate_params(params: &FieldParams) -> Result<(), DiffusionError> {
    let name = params.substance_name.as_str();
    if params.resolution <= 0 {
        return Err(DiffusionError::InvalidResolution {
            substance: name.to_string(),
            resolution: params.resolution,
        });
    }
    if params.diffusion_steps == 0 {
        return Err(DiffusionError::InvalidDiffusionSteps { substance: name.to_string() });
    }
    if let Some(&bad) = params.coefficients.iter().find(|c| !c.is_finite()) {
        return Err(invalid(name, "diffusion coefficient", bad));
    }
    let dc = params.diffusion_coefficient();
    if dc < 0.0 {
        return Err(invalid(name, "diffusion coefficient", dc));
    }
    if !(params.decay_constant >= 0.0) || !params.decay_constant.is_finite() {
        return Err(invalid(name, "decay constant", params.decay_constant));
    }
    if !(params.timestep >= 0.0) || !params.timestep.is_finite() {
        return Err(invalid(name, "timestep", params.timestep));
    }
    if params.lower_threshold.is_nan() || params.lower_threshold > params.upper_threshold {
        return Err(invalid(name, "lower threshold", params.lower_threshold));
    }
    if params.upper_threshold.is_nan() {
        return Err(invalid(name, "upper threshold", params.upper_threshold));
    }
    Ok(())
}

fn compute_is_fixed(params: &FieldParams) -> bool {
    params.decay_constant == 0.0 && params.coefficients[1..].iter().all(|&c| c == 0.0)
}

impl Field {
    /// Creates an empty field. The grid is laid out by [`initialize`](Self::initialize).
    pub fn new(params: FieldParams) -> Result<Self, DiffusionError> {
        validate_params(&params)?;
        let solver = DiffusionSolver::new(params.method, params.boundary, params.diffusion_steps);
        let clamp = ConcentrationClamp::new(params.lower_threshold, params.upper_threshold);
        let is_fixed = compute_is_fixed(&params);
        Ok(Field {
            params,
            geometry: GridGeometry::default(),
            storage: FieldStorage::default(),
            solver,
            clamp,
            initializers: InitializerRegistry::default(),
            boundary: BoundaryCondition::default(),
            initialized: false,
            is_fixed,
            gradient_computed: false,
            last_dt: 0.0,
            simulated_time: 0.0,
        })
    }

    /// Lays out the grid over `[min, max]` on every axis and allocates zeroed
    /// buffers. Fails if the configured timestep would be unstable.
    pub fn initialize(&mut self, min: f64, max: f64) -> Result<(), DiffusionError> {
        let name = self.params.substance_name.as_str();
        let geometry = GridGeometry::new(name, [min, max], self.params.resolution as usize)?;
        check_stability(
            name,
            self.params.diffusion_coefficient(),
            self.solver.step_size(self.params.timestep),
            geometry.box_length(),
        )?;

        self.storage = FieldStorage::new(geometry.total_boxes(), self.solver.needs_midpoint());
        self.geometry = geometry;
        self.initialized = true;
        self.gradient_computed = false;

        info!(
            "Initialized field '{}' (id {}): {}^3 boxes, box length {:.4}, bounds [{}, {}], {:?}/{:?}.",
            self.params.substance_name,
            self.params.substance_id,
            self.geometry.num_boxes_axis(),
            self.geometry.box_length(),
            min,
            max,
            self.params.method,
            self.params.boundary
        );
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), DiffusionError> {
        if !self.initialized {
            return Err(DiffusionError::NotInitialized { substance: self.params.substance_name.clone() });
        }
        Ok(())
    }

    // --- Initializers ---

    /// Queues a seeding function for the next [`run_initializers`](Self::run_initializers).
    pub fn add_initializer<F>(&mut self, initializer: F)
    where
        F: Fn(f64, f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.initializers.push(Box::new(initializer));
    }

    /// Queues a seeding function described by a configuration entry.
    pub fn add_initializer_config(&mut self, config: &InitializerConfig) {
        self.initializers.push(initializers::from_config(config));
    }

    pub fn pending_initializers(&self) -> usize {
        self.initializers.len()
    }

    /// Evaluates every queued function at every voxel's sample point and adds
    /// the result. The queue is emptied afterwards.
    pub fn run_initializers(&mut self) -> Result<(), DiffusionError> {
        self.ensure_initialized()?;
        let queued: Vec<InitializerFn> = self.initializers.drain();
        if queued.is_empty() {
            return Ok(());
        }

        let geometry = &self.geometry;
        let storage = &self.storage;
        let clamp = &self.clamp;
        for initializer in &queued {
            (0..geometry.total_boxes()).into_par_iter().for_each(|idx| {
                let p = geometry.voxel_position(geometry.coordinates_of(idx));
                storage.add_clamped(idx, initializer(p.x, p.y, p.z), clamp);
            });
        }
        info!(
            "Applied {} initializer(s) to '{}'; total concentration {:.6}.",
            queued.len(),
            self.params.substance_name,
            self.storage.total()
        );
        Ok(())
    }

    // --- Scheduler Interface ---

    /// Grows the grid to cover `[new_min, new_max]`. Returns true if the grid
    /// was resized; bounds that fit inside the current grid leave it unchanged.
    pub fn update(&mut self, new_min: f64, new_max: f64) -> Result<bool, DiffusionError> {
        self.ensure_initialized()?;
        let plan = match plan_growth(&self.geometry, new_min, new_max) {
            Some(plan) => plan,
            None => return Ok(false),
        };

        apply_growth(&self.params.substance_name, &mut self.geometry, &mut self.storage, plan)?;
        self.storage.ensure_midpoint(self.solver.needs_midpoint());
        check_stability(
            &self.params.substance_name,
            self.params.diffusion_coefficient(),
            self.solver.step_size(self.params.timestep),
            self.geometry.box_length(),
        )?;
        Ok(true)
    }

    /// Advances the field by `dt`.
    pub fn diffuse(&mut self, dt: f64) -> Result<(), DiffusionError> {
        self.ensure_initialized()?;
        if !(dt >= 0.0) || !dt.is_finite() {
            return Err(invalid(&self.params.substance_name, "timestep", dt));
        }
        self.last_dt = dt;
        if self.is_fixed {
            debug!("Field '{}' is fixed; skipping diffusion.", self.params.substance_name);
            self.simulated_time += dt;
            return Ok(());
        }

        let box_length = self.geometry.box_length();
        let diffusion_coefficient = self.params.diffusion_coefficient();
        check_stability(
            &self.params.substance_name,
            diffusion_coefficient,
            self.solver.step_size(dt),
            box_length,
        )?;

        let start = Instant::now();
        self.solver.advance(
            &mut self.storage,
            self.geometry.num_boxes_axis(),
            box_length,
            Rates { diffusion_coefficient, decay_constant: self.params.decay_constant },
            self.clamp,
            dt,
            self.boundary.at(self.geometry.bounds()[0], box_length, self.simulated_time),
        );
        self.simulated_time += dt;
        trace!(
            "Diffused '{}' over {} boxes in {:.3} ms.",
            self.params.substance_name,
            self.geometry.total_boxes(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Recomputes the gradient of every voxel from the current concentrations.
    pub fn calculate_gradient(&mut self) -> Result<(), DiffusionError> {
        self.ensure_initialized()?;
        if self.is_fixed && self.gradient_computed {
            return Ok(());
        }
        let n = self.geometry.num_boxes_axis();
        let box_length = self.geometry.box_length();
        let (current, gradients) = self.storage.gradient_buffers();
        compute_gradients(n, box_length, current, gradients);
        self.gradient_computed = true;
        Ok(())
    }

    // --- Agent Interface ---

    /// Voxel containing `position`, or `None` (after a debug assertion) if the
    /// position lies outside the grid.
    fn locate(&self, position: Vec3) -> Option<VoxelIndex> {
        let index = self.voxel_index(position);
        debug_assert!(
            index.is_some(),
            "position {:?} is outside the diffusion grid of '{}'",
            position,
            self.params.substance_name
        );
        index
    }

    /// Concentration at `position`. Positions outside the grid read as zero.
    pub fn get_concentration(&self, position: Vec3) -> f64 {
        self.locate(position).map_or(0.0, |idx| self.storage.read(idx.get()))
    }

    /// Concentration of a voxel.
    pub fn concentration_at(&self, index: VoxelIndex) -> f64 {
        self.storage.read(index.get())
    }

    /// Unit gradient at `position`, or zero where the gradient is negligible
    /// or the position lies outside the grid.
    pub fn get_gradient(&self, position: Vec3) -> Vec3 {
        self.locate(position).map_or(Vec3::zero(), |idx| {
            self.storage.gradient(idx.get()).normalize_or_zero(GRADIENT_EPSILON)
        })
    }

    /// Adds `amount` to the voxel containing `position`, then clamps it to
    /// the thresholds. Safe to call from many threads at once.
    pub fn increase_concentration_by(&self, position: Vec3, amount: f64) {
        match self.locate(position) {
            Some(idx) => self.increase_concentration_at(idx, amount),
            None => error!(
                "Ignoring write of {} to '{}' at {:?}: outside the grid.",
                amount, self.params.substance_name, position
            ),
        }
    }

    /// Same as [`increase_concentration_by`](Self::increase_concentration_by)
    /// for a known voxel.
    pub fn increase_concentration_at(&self, index: VoxelIndex, amount: f64) {
        if index.get() >= self.storage.len() {
            error!("Ignoring write to '{}': voxel {} is out of range.", self.params.substance_name, index.get());
            return;
        }
        self.storage.add_clamped(index.get(), amount, &self.clamp);
    }

    pub fn change_concentration_by(&self, position: Vec3, amount: f64) {
        self.increase_concentration_by(position, amount);
    }

    pub fn change_concentration_at(&self, index: VoxelIndex, amount: f64) {
        self.increase_concentration_at(index, amount);
    }

    /// Checked voxel index for a position, for callers that write repeatedly
    /// to the same place. `None` outside the grid.
    pub fn voxel_index(&self, position: Vec3) -> Option<VoxelIndex> {
        let [min, _] = self.geometry.bounds();
        let n = self.geometry.num_boxes_axis();
        // box_coordinates saturates below min, so check that side explicitly
        if !(position.x >= min && position.y >= min && position.z >= min) {
            return None;
        }
        let coord = self.geometry.box_coordinates(position);
        coord.iter().all(|&c| c < n).then(|| self.geometry.box_index(coord))
    }

    // --- Boundary Values ---

    /// Sets the boundary value function `f(x, y, z, t)` read by Dirichlet and
    /// Neumann edges. Other boundary modes ignore it.
    pub fn set_boundary_condition<F>(&mut self, function: F)
    where
        F: Fn(f64, f64, f64, f64) -> f64 + Send + Sync + 'static,
    {
        if !self.params.boundary.uses_boundary_value() {
            debug!(
                "Boundary condition set on '{}', but {:?} edges do not read it.",
                self.params.substance_name, self.params.boundary
            );
        }
        self.boundary.set(Box::new(function));
    }

    pub fn has_boundary_condition(&self) -> bool {
        self.boundary.is_set()
    }

    /// Boundary value at a point, zero if no function is set.
    pub fn boundary_value(&self, position: Vec3, time: f64) -> f64 {
        self.boundary.evaluate(position.x, position.y, position.z, time)
    }

    /// Sum of the timesteps passed to [`diffuse`](Self::diffuse).
    pub fn simulated_time(&self) -> f64 {
        self.simulated_time
    }

    // --- Live Parameters ---

    pub fn set_decay_constant(&mut self, decay_constant: f64) -> Result<(), DiffusionError> {
        if !(decay_constant >= 0.0) || !decay_constant.is_finite() {
            return Err(invalid(&self.params.substance_name, "decay constant", decay_constant));
        }
        self.params.decay_constant = decay_constant;
        self.is_fixed = compute_is_fixed(&self.params);
        Ok(())
    }

    /// Fails if `upper` is NaN or below the lower threshold.
    pub fn set_upper_threshold(&mut self, upper: f64) -> Result<(), DiffusionError> {
        if upper.is_nan() || upper < self.clamp.lower {
            return Err(invalid(&self.params.substance_name, "upper threshold", upper));
        }
        self.params.upper_threshold = upper;
        self.clamp.upper = upper;
        Ok(())
    }

    /// Fails if `lower` is NaN or above the upper threshold.
    pub fn set_lower_threshold(&mut self, lower: f64) -> Result<(), DiffusionError> {
        if lower.is_nan() || lower > self.clamp.upper {
            return Err(invalid(&self.params.substance_name, "lower threshold", lower));
        }
        self.params.lower_threshold = lower;
        self.clamp.lower = lower;
        Ok(())
    }

    /// Alias of [`set_upper_threshold`](Self::set_upper_threshold).
    pub fn set_concentration_threshold(&mut self, upper: f64) -> Result<(), DiffusionError> {
        self.set_upper_threshold(upper)
    }

    // --- Accessors ---

    pub fn params(&self) -> &FieldParams {
        &self.params
    }

    pub fn substance_id(&self) -> u32 {
        self.params.substance_id
    }

    pub fn substance_name(&self) -> &str {
        &self.params.substance_name
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn diffusion_coefficients(&self) -> [f64; 7] {
        self.params.coefficients
    }

    pub fn decay_constant(&self) -> f64 {
        self.params.decay_constant
    }

    pub fn upper_threshold(&self) -> f64 {
        self.clamp.upper
    }

    pub fn lower_threshold(&self) -> f64 {
        self.clamp.lower
    }

    pub fn boundary_mode(&self) -> BoundaryMode {
        self.params.boundary
    }

    pub fn method(&self) -> DiffusionMethod {
        self.params.method
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Timestep of the most recent [`diffuse`](Self::diffuse) call.
    pub fn last_timestep(&self) -> f64 {
        self.last_dt
    }

    pub fn box_length(&self) -> f64 {
        self.geometry.box_length()
    }

    pub fn box_volume(&self) -> f64 {
        self.geometry.box_volume()
    }

    /// Boxes per axis.
    pub fn resolution(&self) -> usize {
        self.geometry.num_boxes_axis()
    }

    pub fn num_boxes_array(&self) -> [usize; 3] {
        self.geometry.num_boxes_array()
    }

    pub fn total_boxes(&self) -> usize {
        self.geometry.total_boxes()
    }

    pub fn grid_size(&self) -> [f64; 3] {
        self.geometry.grid_size()
    }

    pub fn dimensions(&self) -> [f64; 6] {
        self.geometry.dimensions()
    }

    /// Copy of all concentrations, index `x + y*nx + z*nx*ny`.
    pub fn concentrations(&self) -> Vec<f64> {
        self.storage.current_values()
    }

    /// Raw gradients from the last [`calculate_gradient`](Self::calculate_gradient).
    pub fn gradients(&self) -> &[Vec3] {
        self.storage.gradients()
    }

    /// Runge-Kutta half-step estimates of the last sub-step (empty for Euler).
    pub fn midpoint(&self) -> &[f64] {
        self.storage.midpoint()
    }

    pub fn total_concentration(&self) -> f64 {
        self.storage.total()
    }

    // --- Persistence ---

    pub fn to_state(&self) -> FieldState {
        FieldState {
            params: self.params.clone(),
            initialized: self.initialized,
            bounds: self.geometry.bounds(),
            box_length: self.geometry.box_length(),
            num_boxes_axis: self.geometry.num_boxes_axis(),
            parity: self.geometry.parity(),
            last_dt: self.last_dt,
            simulated_time: self.simulated_time,
            concentrations: self.storage.current_values(),
        }
    }

    /// Rebuilds a field from [`to_state`](Self::to_state) output. Gradients
    /// are not persisted; call [`calculate_gradient`](Self::calculate_gradient)
    /// before reading them. Neither is the boundary value function.
    pub fn from_state(state: FieldState) -> Result<Self, DiffusionError> {
        let mut field = Field::new(state.params)?;
        field.last_dt = state.last_dt;
        field.simulated_time = state.simulated_time;
        if !state.initialized {
            return Ok(field);
        }

        let substance = field.params.substance_name.clone();
        let reject = |reason: String| DiffusionError::Deserialize { substance: substance.clone(), reason };

        GridGeometry::check_box_length(&substance, state.box_length)?;
        let n = state.num_boxes_axis;
        if n == 0 || state.parity != (n % 2 == 1) {
            return Err(reject(format!("{} boxes per axis do not match parity {}", n, state.parity)));
        }
        if state.concentrations.len() != n * n * n {
            return Err(reject(format!(
                "expected {} concentrations, found {}",
                n * n * n,
                state.concentrations.len()
            )));
        }
        if !(state.bounds[1] > state.bounds[0]) {
            return Err(reject(format!("bounds [{}, {}] are empty", state.bounds[0], state.bounds[1])));
        }

        let geometry = GridGeometry::from_parts(state.bounds, state.box_length, n, state.parity);
        let mut storage = FieldStorage::new(geometry.total_boxes(), field.solver.needs_midpoint());
        for (idx, &value) in state.concentrations.iter().enumerate() {
            storage.set(idx, value);
        }
        field.geometry = geometry;
        field.storage = storage;
        field.initialized = true;
        Ok(field)
    }

    /// Snapshot of the field for output.
    pub fn to_snapshot(&self, time: f64, step: u32, include_gradients: bool) -> FieldSnapshot {
        FieldSnapshot {
            time,
            step,
            substance_id: self.params.substance_id,
            substance_name: self.params.substance_name.clone(),
            dimensions: self.geometry.dimensions(),
            box_length: self.geometry.box_length(),
            num_boxes_axis: self.geometry.num_boxes_array(),
            total_concentration: self.storage.total(),
            concentrations: self.storage.current_values(),
            gradients: include_gradients
                .then(|| self.storage.gradients().iter().map(|g| g.to_array()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(dc: f64, decay: f64) -> FieldParams {
        FieldParams::new(0, "substance", dc, decay, 4).with_timestep(1.0)
    }

    fn initialized(dc: f64, decay: f64) -> Field {
        let mut field = Field::new(params(dc, decay)).unwrap();
        field.initialize(0.0, 40.0).unwrap();
        field
    }

    #[test]
    fn rejects_invalid_parameters() {
        let err = Field::new(FieldParams::new(0, "s", 0.1, 0.0, 0)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidResolution { resolution: 0, .. }));

        let err = Field::new(params(0.1, 0.0).with_method(DiffusionMethod::RungeKutta, 0)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidDiffusionSteps { .. }));

        let err = Field::new(params(0.1, -1.0)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { name: "decay constant", .. }));

        let err = Field::new(params(0.1, f64::NAN)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { .. }));

        let err = Field::new(params(-0.2, 0.0)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { name: "diffusion coefficient", .. }));

        let err = Field::new(params(0.1, 0.0).with_thresholds(2.0, 1.0)).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { name: "lower threshold", .. }));
    }

    #[test]
    fn initialize_rejects_unstable_timestep() {
        // box length 1, D = 0.5, dt = 1 -> 0.5 >= 1/6
        let mut field = Field::new(FieldParams::new(0, "s", 0.5, 0.0, 11).with_timestep(1.0)).unwrap();
        let err = field.initialize(0.0, 10.0).unwrap_err();
        assert!(matches!(err, DiffusionError::Unstable { .. }));
        assert!(!field.is_initialized());
    }

    #[test]
    fn runge_kutta_checks_sub_step() {
        let rk = FieldParams::new(0, "s", 0.5, 0.0, 11)
            .with_method(DiffusionMethod::RungeKutta, 4)
            .with_timestep(1.0);
        let mut field = Field::new(rk).unwrap();
        // dt / 4 = 0.25 -> 0.125 < 1/6
        field.initialize(0.0, 10.0).unwrap();
        assert_eq!(field.midpoint().len(), 11 * 11 * 11);
        assert!(field.diffuse(1.0).is_ok());
        assert!(matches!(field.diffuse(2.0), Err(DiffusionError::Unstable { .. })));
    }

    #[test]
    fn operations_require_initialization() {
        let mut field = Field::new(params(0.1, 0.0)).unwrap();
        assert!(matches!(field.diffuse(0.1), Err(DiffusionError::NotInitialized { .. })));
        assert!(matches!(field.calculate_gradient(), Err(DiffusionError::NotInitialized { .. })));
        assert!(matches!(field.update(0.0, 10.0), Err(DiffusionError::NotInitialized { .. })));
        assert!(matches!(field.run_initializers(), Err(DiffusionError::NotInitialized { .. })));
    }

    #[test]
    fn fixed_field_detection_follows_decay() {
        let mut field = initialized(0.0, 0.0);
        assert!(field.is_fixed());
        field.set_decay_constant(0.1).unwrap();
        assert!(!field.is_fixed());
        field.set_decay_constant(0.0).unwrap();
        assert!(field.is_fixed());
        assert!(field.set_decay_constant(-1.0).is_err());
        assert!(!initialized(0.3, 0.0).is_fixed());
    }

    #[test]
    fn writes_are_clamped() {
        let mut field = initialized(0.3, 0.0);
        field.set_upper_threshold(5.0).unwrap();
        let p = Vec3::new(20.0, 20.0, 20.0);
        field.increase_concentration_by(p, 3.0);
        field.change_concentration_by(p, 3.0);
        assert_eq!(field.get_concentration(p), 5.0);
        field.increase_concentration_by(p, -10.0);
        assert_eq!(field.get_concentration(p), 0.0);

        field.set_lower_threshold(-1.0).unwrap();
        field.increase_concentration_by(p, -10.0);
        assert_eq!(field.get_concentration(p), -1.0);
        field.set_concentration_threshold(0.5).unwrap();
        assert_eq!(field.upper_threshold(), 0.5);
    }

    #[test]
    fn threshold_setters_keep_lower_below_upper() {
        let mut field = initialized(0.3, 0.0);
        field.set_upper_threshold(4.0).unwrap();

        let err = field.set_lower_threshold(5.0).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { name: "lower threshold", .. }));
        let err = field.set_upper_threshold(-1.0).unwrap_err();
        assert!(matches!(err, DiffusionError::InvalidParameter { name: "upper threshold", .. }));
        assert!(field.set_upper_threshold(f64::NAN).is_err());
        assert!(field.set_lower_threshold(f64::NAN).is_err());
        assert!(field.set_concentration_threshold(f64::NAN).is_err());

        // Rejected values leave the clamp untouched.
        assert_eq!(field.lower_threshold(), 0.0);
        assert_eq!(field.upper_threshold(), 4.0);
        let p = Vec3::new(20.0, 20.0, 20.0);
        field.increase_concentration_by(p, 1e30);
        assert_eq!(field.get_concentration(p), 4.0);
        assert_eq!(field.params().upper_threshold, 4.0);

        // Equal thresholds pin every write to one value.
        field.set_lower_threshold(4.0).unwrap();
        field.increase_concentration_by(p, -10.0);
        assert_eq!(field.get_concentration(p), 4.0);
    }

    #[test]
    fn index_and_position_writes_agree() {
        let field = initialized(0.3, 0.0);
        let p = Vec3::new(30.0, 1.0, 14.0);
        let idx = field.voxel_index(p).unwrap();
        assert_eq!(idx.get(), 18); // box (2, 0, 1)
        field.increase_concentration_at(idx, 2.0);
        field.change_concentration_at(idx, 1.0);
        assert_eq!(field.get_concentration(p), 3.0);
        assert_eq!(field.concentration_at(idx), 3.0);
        assert!(field.voxel_index(Vec3::new(-1.0, 0.0, 0.0)).is_none());
        assert!(field.voxel_index(Vec3::new(0.0, 60.0, 0.0)).is_none());
    }

    #[test]
    fn initializers_run_once() {
        let mut field = initialized(0.3, 0.0);
        field.add_initializer(|x, _, _| if x < 1.0 { 2.0 } else { 0.0 });
        field.add_initializer_config(&InitializerConfig::Uniform {
            min: 0.0,
            max: 100.0,
            value: 1.0,
            axis: continuum_common::Axis::Z,
        });
        assert_eq!(field.pending_initializers(), 2);
        field.run_initializers().unwrap();
        assert_eq!(field.pending_initializers(), 0);

        // 16 voxels with x = 0 get 2 extra; all 64 get 1.
        assert!((field.total_concentration() - (16.0 * 2.0 + 64.0)).abs() < 1e-12);
        field.run_initializers().unwrap();
        assert!((field.total_concentration() - 96.0).abs() < 1e-12);
    }

    #[test]
    fn gradient_is_normalized() {
        let mut field = initialized(0.3, 0.0);
        field.add_initializer(|_, y, _| y);
        field.run_initializers().unwrap();
        field.calculate_gradient().unwrap();
        let g = field.get_gradient(Vec3::new(20.0, 20.0, 20.0));
        assert!((g.y - 1.0).abs() < 1e-12);
        assert!(g.x.abs() < 1e-12 && g.z.abs() < 1e-12);
        assert!((field.gradients()[21].y - 1.0).abs() < 1e-9);

        let flat = initialized(0.3, 0.0);
        assert_eq!(flat.get_gradient(Vec3::new(20.0, 20.0, 20.0)), Vec3::zero());
    }

    #[test]
    fn update_grows_and_records_extent() {
        let mut field = initialized(0.3, 0.0);
        let bl = field.box_length();
        assert!(!field.update(0.0, 40.0).unwrap());
        assert!(field.update(-2.0 * bl, 40.0 + 2.0 * bl).unwrap());
        assert_eq!(field.resolution() % 2, 0);
        assert!(field.resolution() > 4);
        assert_eq!(field.box_length(), bl);
        assert_eq!(field.concentrations().len(), field.total_boxes());
        assert_eq!(field.gradients().len(), field.total_boxes());
    }

    #[test]
    fn diffuse_records_timestep() {
        let mut field = initialized(0.3, 0.0);
        field.diffuse(0.5).unwrap();
        assert_eq!(field.last_timestep(), 0.5);
    }

    fn bounded(boundary: BoundaryMode) -> Field {
        // 5 boxes of length 1 over [-2, 2]
        let params = FieldParams::new(0, "edge", 0.1, 0.0, 5).with_boundary(boundary).with_timestep(0.5);
        let mut field = Field::new(params).unwrap();
        field.initialize(-2.0, 2.0).unwrap();
        field
    }

    #[test]
    fn dirichlet_edges_follow_position_and_time() {
        let mut field = bounded(BoundaryMode::Dirichlet);
        field.set_boundary_condition(|x, _, _, t| 10.0 + x + t);
        assert!(field.has_boundary_condition());

        field.diffuse(0.5).unwrap();
        // Evaluated at the start of the step, t = 0
        assert_eq!(field.get_concentration(Vec3::new(-2.0, -2.0, -2.0)), 8.0);
        assert_eq!(field.get_concentration(Vec3::new(2.0, 0.0, 0.0)), 12.0);
        assert_eq!(field.get_concentration(Vec3::new(0.0, 0.0, 0.0)), 0.0);

        field.diffuse(0.5).unwrap();
        assert_eq!(field.simulated_time(), 1.0);
        assert_eq!(field.get_concentration(Vec3::new(-2.0, -2.0, -2.0)), 8.5);
        assert!(field.get_concentration(Vec3::new(-1.0, 0.0, 0.0)) > 0.0);
        assert_eq!(field.boundary_value(Vec3::new(1.0, 0.0, 0.0), 2.0), 13.0);
    }

    #[test]
    fn dirichlet_values_are_clamped() {
        let mut field = bounded(BoundaryMode::Dirichlet);
        field.set_upper_threshold(3.0).unwrap();
        field.set_boundary_condition(|_, _, _, _| 50.0);
        field.diffuse(0.5).unwrap();
        assert_eq!(field.get_concentration(Vec3::new(-2.0, 0.0, 0.0)), 3.0);
    }

    #[test]
    fn neumann_edges_take_flux_through_faces() {
        let mut field = bounded(BoundaryMode::Neumann);
        // Inflow of 2 per unit length through every face, factor 0.1 * 0.5
        field.set_boundary_condition(|_, _, _, _| -2.0);
        field.diffuse(0.5).unwrap();
        assert!((field.get_concentration(Vec3::new(-2.0, -2.0, -2.0)) - 0.3).abs() < 1e-12);
        assert!((field.get_concentration(Vec3::new(-2.0, 0.0, 0.0)) - 0.1).abs() < 1e-12);
        assert_eq!(field.get_concentration(Vec3::new(0.0, 0.0, 0.0)), 0.0);

        // Without a function the edge is closed.
        let mut closed = bounded(BoundaryMode::Neumann);
        closed.increase_concentration_by(Vec3::new(-2.0, -2.0, -2.0), 1.0);
        for _ in 0..5 {
            closed.diffuse(0.5).unwrap();
        }
        assert!((closed.total_concentration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn diffuse_rejects_negative_or_non_finite_timestep() {
        for dt in [-0.5, f64::NAN, f64::INFINITY] {
            let mut field = initialized(0.3, 0.0);
            field.increase_concentration_by(Vec3::new(20.0, 20.0, 20.0), 1.0);
            let before = field.concentrations();
            let err = field.diffuse(dt).unwrap_err();
            assert!(matches!(err, DiffusionError::InvalidParameter { name: "timestep", .. }));
            assert_eq!(field.concentrations(), before);
            assert_eq!(field.last_timestep(), 0.0);
        }

        // Fixed fields reject it too, before skipping the sweep.
        let mut fixed = initialized(0.0, 0.0);
        assert!(fixed.diffuse(-1.0).is_err());
        assert!(fixed.diffuse(0.0).is_ok());
    }

    #[test]
    fn state_round_trip_restores_field() {
        let mut field = initialized(0.3, 0.01);
        field.increase_concentration_by(Vec3::new(20.0, 20.0, 20.0), 4.0);
        field.diffuse(1.0).unwrap();
        let state = field.to_state();

        let restored = Field::from_state(state.clone()).unwrap();
        assert_eq!(restored.to_state(), state);
        assert_eq!(restored.concentrations(), field.concentrations());
        assert_eq!(restored.last_timestep(), 1.0);
    }

    #[test]
    fn state_with_wrong_length_is_rejected() {
        let field = initialized(0.3, 0.0);
        let mut state = field.to_state();
        state.concentrations.pop();
        let err = Field::from_state(state).unwrap_err();
        assert!(matches!(err, DiffusionError::Deserialize { .. }));
    }

    #[test]
    fn snapshot_reports_geometry() {
        let mut field = initialized(0.3, 0.0);
        field.increase_concentration_by(Vec3::new(0.0, 0.0, 0.0), 1.5);
        field.calculate_gradient().unwrap();
        let snapshot = field.to_snapshot(2.0, 4, true);
        assert_eq!(snapshot.num_boxes_axis, [4, 4, 4]);
        assert_eq!(snapshot.dimensions, [0.0, 40.0, 0.0, 40.0, 0.0, 40.0]);
        assert_eq!(snapshot.total_concentration, 1.5);
        assert_eq!(snapshot.gradients.map(|g| g.len()), Some(64));
        assert!(field.to_snapshot(2.0, 4, false).gradients.is_none());
    }
}
