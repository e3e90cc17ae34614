use crate::field::Field;
use anyhow::{Context, Result};
use continuum_common::{clamp, FieldSnapshot, SimulationConfig, Vec3};
use log::{debug, info};
use rand::distr::Uniform;
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;
use std::collections::HashSet;

/// Owns one diffusion field per substance and drives them through time.
pub struct ContinuumSimulation {
    /// The simulation configuration the fields were built from.
    pub config: SimulationConfig,
    /// One field per substance, in configuration order.
    fields: Vec<Field>,
    /// Current cubic domain bounds `[min, max]`; grows every step by `growth_per_step`.
    bounds: [f64; 2],
    /// Positions of the point secretors.
    sources: Vec<Vec3>,
    /// Seeded RNG for source placement and jitter.
    pub rng: StdRng,
    jitter: Option<Normal<f64>>,
    /// The current step number.
    pub current_time_step: u32,
    /// Snapshots collected at record intervals.
    recorded_snapshots: Vec<FieldSnapshot>,
}

impl ContinuumSimulation {
    /// Builds, initializes and seeds every field, then places the point sources.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let bounds = [config.domain.min, config.domain.max];
        let mut rng = StdRng::seed_from_u64(config.sources.seed);

        let mut seen_ids = HashSet::new();
        let mut fields = Vec::with_capacity(config.substances.len());
        for substance in &config.substances {
            if !seen_ids.insert(substance.id) {
                anyhow::bail!("Substance id {} is used by more than one field.", substance.id);
            }
            let mut field = Field::new(substance.field_params(config.timing.dt))
                .with_context(|| format!("Invalid parameters for substance '{}'", substance.name))?;
            field
                .initialize(bounds[0], bounds[1])
                .with_context(|| format!("Failed to initialize substance '{}'", substance.name))?;
            if substance.boundary.uses_boundary_value() {
                let value = substance.boundary_value;
                field.set_boundary_condition(move |_, _, _, _| value);
            }
            for initializer in &substance.initializers {
                field.add_initializer_config(initializer);
            }
            field.run_initializers()?;
            fields.push(field);
        }

        // Sources are placed uniformly inside the initial domain.
        let sources = if config.sources.count > 0 {
            let coord_dist = Uniform::new(bounds[0], bounds[1])?;
            (0..config.sources.count)
                .map(|_| Vec3::new(rng.sample(coord_dist), rng.sample(coord_dist), rng.sample(coord_dist)))
                .collect()
        } else {
            Vec::new()
        };

        let jitter = if config.sources.jitter > 0.0 {
            let normal = Normal::new(0.0, config.sources.jitter)
                .map_err(|e| anyhow::anyhow!("Invalid source jitter {}: {}", config.sources.jitter, e))?;
            Some(normal)
        } else {
            None
        };

        info!(
            "Created {} field(s) and {} point source(s) over [{}, {}].",
            fields.len(),
            sources.len(),
            bounds[0],
            bounds[1]
        );

        Ok(Self {
            config,
            fields,
            bounds,
            sources,
            rng,
            jitter,
            current_time_step: 0,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the simulation by one timestep (`dt`).
    pub fn step(&mut self) -> Result<()> {
        let dt = self.config.timing.dt;

        // --- 1. Grow Domain ---
        let growth = self.config.domain.growth_per_step;
        if growth > 0.0 {
            self.bounds[0] -= growth;
            self.bounds[1] += growth;
            for field in &mut self.fields {
                field
                    .update(self.bounds[0], self.bounds[1])
                    .with_context(|| format!("Failed to grow field '{}'", field.substance_name()))?;
            }
        }

        // --- 2. Secrete (Parallel) ---
        self.move_sources();
        let amount = self.config.sources.rate * dt;
        if amount != 0.0 {
            let fields = &self.fields;
            self.sources.par_iter().for_each(|&position| {
                for field in fields {
                    field.increase_concentration_by(position, amount);
                }
            });
        }

        // --- 3. Diffuse and Update Gradients ---
        for field in &mut self.fields {
            field
                .diffuse(dt)
                .with_context(|| format!("Diffusion failed for '{}'", field.substance_name()))?;
            field.calculate_gradient()?;
        }

        self.current_time_step += 1;
        Ok(())
    }

    /// Applies the random walk to every source, keeping it inside the initial domain.
    fn move_sources(&mut self) {
        let jitter = match self.jitter {
            Some(normal) => normal,
            None => return,
        };
        let [min, max] = [self.config.domain.min, self.config.domain.max];
        for source in &mut self.sources {
            let step = Vec3::new(self.rng.sample(jitter), self.rng.sample(jitter), self.rng.sample(jitter));
            let moved = *source + step;
            *source = Vec3::new(clamp(moved.x, min, max), clamp(moved.y, min, max), clamp(moved.z, min, max));
        }
    }

    /// Stores a snapshot of every field at the current step.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let step = self.current_time_step;
        let time = step as f64 * self.config.timing.dt;
        let include_gradients = self.config.output.save_gradients_in_snapshot;

        debug!("Recording snapshot at t = {:.3}...", time);
        for field in &self.fields {
            let snapshot = field.to_snapshot(time, step, include_gradients);
            debug!(
                "  '{}': {}^3 boxes, total concentration {:.6}",
                snapshot.substance_name, snapshot.num_boxes_axis[0], snapshot.total_concentration
            );
            self.recorded_snapshots.push(snapshot);
        }
        Ok(())
    }

    /// Provides access to the recorded snapshots.
    pub fn recorded_snapshots(&self) -> &[FieldSnapshot] {
        &self.recorded_snapshots
    }

    pub fn field(&self, id: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.substance_id() == id)
    }

    pub fn field_mut(&mut self, id: u32) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.substance_id() == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.substance_name() == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn bounds(&self) -> [f64; 2] {
        self.bounds
    }

    pub fn sources(&self) -> &[Vec3] {
        &self.sources
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulated time after the steps taken so far.
    pub fn current_time(&self) -> f64 {
        self.current_time_step as f64 * self.config.timing.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [domain]
        min = 0.0
        max = 40.0
        growth_per_step = 0.0

        [timing]
        dt = 1.0
        total_steps = 5
        record_interval_steps = 1

        [[substances]]
        id = 3
        name = "attractant"
        diffusion_coefficient = 0.3
        resolution = 5

        [[substances.initializers]]
        kind = "uniform"
        min = 0.0
        max = 40.0
        value = 1.0
        axis = "x"

        [[substances]]
        id = 8
        name = "repellent"
        diffusion_coefficient = 0.2
        decay_constant = 0.05
        resolution = 5
        boundary = "leaking"

        [sources]
        count = 4
        seed = 42
        rate = 2.0
        jitter = 1.5

        [output]
        base_filename = "test"
    "#;

    fn simulation(text: &str) -> ContinuumSimulation {
        ContinuumSimulation::new(SimulationConfig::from_toml_str(text).unwrap()).unwrap()
    }

    #[test]
    fn builds_one_field_per_substance() {
        let sim = simulation(CONFIG);
        assert_eq!(sim.fields().len(), 2);
        assert_eq!(sim.field(3).unwrap().substance_name(), "attractant");
        assert_eq!(sim.field_by_name("repellent").unwrap().substance_id(), 8);
        assert!(sim.field(4).is_none());
        // Uniform initializer covers all 125 voxels.
        assert!((sim.field(3).unwrap().total_concentration() - 125.0).abs() < 1e-9);
        assert_eq!(sim.sources().len(), 4);
    }

    #[test]
    fn sources_add_mass_to_closed_fields() {
        let mut sim = simulation(CONFIG);
        let before = sim.field(3).unwrap().total_concentration();
        sim.step().unwrap();
        sim.step().unwrap();
        let after = sim.field(3).unwrap().total_concentration();
        // 4 sources * 2.0 * dt per step, no decay, closed edges
        assert!((after - before - 16.0).abs() < 1e-9);
        assert_eq!(sim.current_time_step, 2);
        assert_eq!(sim.current_time(), 2.0);
        for source in sim.sources() {
            assert!(source.x >= 0.0 && source.x <= 40.0);
        }
    }

    #[test]
    fn same_seed_same_result() {
        let mut a = simulation(CONFIG);
        let mut b = simulation(CONFIG);
        for _ in 0..3 {
            a.step().unwrap();
            b.step().unwrap();
        }
        assert_eq!(a.sources(), b.sources());
        assert_eq!(a.field(8).unwrap().concentrations(), b.field(8).unwrap().concentrations());
    }

    #[test]
    fn growing_domain_grows_fields() {
        let text = CONFIG.replace("growth_per_step = 0.0", "growth_per_step = 10.0");
        let mut sim = simulation(&text);
        let boxes = sim.field(3).unwrap().resolution();
        let mass = sim.field(3).unwrap().total_concentration();
        sim.step().unwrap();
        assert_eq!(sim.bounds(), [-10.0, 50.0]);
        let field = sim.field(3).unwrap();
        assert!(field.resolution() > boxes);
        assert_eq!(field.resolution() % 2, boxes % 2);
        assert!((field.total_concentration() - mass - 8.0).abs() < 1e-9);
    }

    #[test]
    fn snapshots_cover_every_field() {
        let mut sim = simulation(CONFIG);
        sim.record_snapshot().unwrap();
        sim.step().unwrap();
        sim.record_snapshot().unwrap();
        let snapshots = sim.recorded_snapshots();
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[2].step, 1);
        assert_eq!(snapshots[3].substance_name, "repellent");
        assert!(snapshots[0].gradients.is_none());
    }

    #[test]
    fn dirichlet_substance_holds_its_perimeter() {
        let text = CONFIG.replace("boundary = \"leaking\"", "boundary = \"dirichlet\"\n        boundary_value = 0.75");
        let mut sim = simulation(&text);
        assert!(sim.field(8).unwrap().has_boundary_condition());
        assert!(!sim.field(3).unwrap().has_boundary_condition());
        sim.step().unwrap();
        let repellent = sim.field(8).unwrap();
        assert_eq!(repellent.concentration_at(repellent.geometry().box_index([0, 0, 0])), 0.75);
        assert_eq!(repellent.concentration_at(repellent.geometry().box_index([4, 2, 2])), 0.75);
        assert_eq!(repellent.simulated_time(), 1.0);
    }
}
