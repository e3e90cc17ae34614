use anyhow::Result;
use clap::Parser;
use continuum_common::SimulationConfig;
use continuum_engine::ContinuumSimulation;
use log::{debug, error, info, trace};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

/// Runs a continuum diffusion simulation described by a TOML configuration file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulation configuration.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the number of steps from the configuration.
    #[arg(short, long)]
    steps: Option<u32>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Continuum Diffusion Engine (CPU Parallel)...");

    // --- Load Configuration ---
    let config = SimulationConfig::load(&args.config)?;
    debug!("Configuration: {:#?}", config);

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Fields ---
    let mut sim = ContinuumSimulation::new(config)?;
    for field in sim.fields() {
        info!(
            "Field '{}' (id {}): {}^3 boxes, total concentration {:.6}.",
            field.substance_name(),
            field.substance_id(),
            field.resolution(),
            field.total_concentration()
        );
    }

    // --- Simulation Loop ---
    let total_steps = args.steps.unwrap_or(sim.config().timing.total_steps);
    let record_interval_steps = sim.config().timing.record_interval_steps.max(1);
    let dt = sim.config().timing.dt;
    info!("Recording snapshot every {} steps ({:.3} time units).", record_interval_steps, record_interval_steps as f64 * dt);

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot (time = 0) ---
    if let Err(e) = sim.record_snapshot() {
        error!("Error recording initial snapshot: {}", e);
        anyhow::bail!("Failed to record initial snapshot.");
    }

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {:#}", step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status = current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step == total_steps - 1;

        if should_print_status || is_record_step || is_last_step {
            let total_mass: f64 = sim.fields().iter().map(|f| f.total_concentration()).sum();
            info!(
                "Step [{}/{}] (t = {:.3}) | Bounds: [{:.1}, {:.1}] | Total mass: {:.6} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                sim.current_time(),
                sim.bounds()[0],
                sim.bounds()[1],
                total_mass,
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;

            // --- Record Snapshot ---
            if is_record_step || is_last_step {
                if let Err(e) = sim.record_snapshot() {
                    error!("Error recording snapshot at step {}: {}", step + 1, e);
                    anyhow::bail!("Failed to record snapshot.");
                }
            }
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_snapshots {
        let output_format = output.format.as_deref().unwrap_or("json");
        let snapshots = sim.recorded_snapshots();

        match output_format {
            "json" => save_json(&output.base_filename, snapshots),
            "bincode" => {
                // Binary format (much more compact)
                let filename = format!("{}_snapshots.bin", output.base_filename);
                match File::create(&filename) {
                    Ok(file) => match bincode::serialize_into(file, snapshots) {
                        Ok(_) => info!("All snapshots saved to {} (binary format)", filename),
                        Err(e) => error!("Error serializing snapshots to bincode: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            "messagepack" => {
                let filename = format!("{}_snapshots.msgpack", output.base_filename);
                match &mut File::create(&filename) {
                    Ok(file) => match rmp_serde::encode::write(file, snapshots) {
                        Ok(_) => info!("All snapshots saved to {} (MessagePack format)", filename),
                        Err(e) => error!("Error serializing snapshots to MessagePack: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            _ => {
                error!("Unknown output format: {}. Using JSON instead.", output_format);
                save_json(&output.base_filename, snapshots);
            }
        }
    } else {
        info!("Skipping saving snapshots as per config (save_snapshots is false).");
    }

    // Final concentrations, one CSV per substance
    if output.save_final_csv {
        for field in sim.fields() {
            let filename = format!("{}_{}_final.csv", output.base_filename, field.substance_name());
            match csv::Writer::from_path(&filename) {
                Ok(mut writer) => {
                    writer.write_record(["x", "y", "z", "concentration"])?;
                    let geometry = field.geometry();
                    for (idx, value) in field.concentrations().iter().enumerate() {
                        let p = geometry.voxel_position(geometry.coordinates_of(idx));
                        writer.write_record(&[
                            format!("{:.4}", p.x),
                            format!("{:.4}", p.y),
                            format!("{:.4}", p.z),
                            format!("{:.6e}", value),
                        ])?;
                    }
                    writer.flush()?;
                    info!("Final concentrations of '{}' saved to {}", field.substance_name(), filename);
                }
                Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
            }
        }
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_json(base_filename: &str, snapshots: &[continuum_common::FieldSnapshot]) {
    let filename = format!("{}_snapshots.json", base_filename);
    match File::create(&filename) {
        Ok(mut file) => match serde_json::to_string(snapshots) {
            Ok(json_string) => {
                if let Err(e) = file.write_all(json_string.as_bytes()) {
                    error!("Error writing snapshot JSON to file '{}': {}", filename, e);
                } else {
                    info!("All snapshots saved to {} ({}MB)", filename, json_string.len() / 1_048_576);
                }
            }
            Err(e) => error!("Error serializing snapshots to JSON: {}", e),
        },
        Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
    }
}
