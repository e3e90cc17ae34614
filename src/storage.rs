use crate::clamp::ConcentrationClamp;
use continuum_common::Vec3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern so voxels can be written through a
/// shared reference while other threads read neighbouring voxels.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    #[inline(always)]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Plain write through an exclusive reference (no atomic instruction).
    #[inline(always)]
    pub fn set(&mut self, value: f64) {
        *self.0.get_mut() = value.to_bits();
    }
}

fn zeroed(len: usize) -> Vec<AtomicF64> {
    (0..len).map(|_| AtomicF64::new(0.0)).collect()
}

/// Concentration, gradient and lock buffers of one field.
#[derive(Debug, Default)]
pub struct FieldStorage {
    // --- Ping-Pong Buffers ---
    // Concentrations visible to agents and read by the stencil
    current: Vec<AtomicF64>,
    // Output of the sweep in flight; becomes `current` on swap
    next: Vec<AtomicF64>,
    // Half-step estimate of the Runge-Kutta scheme (empty for Euler)
    midpoint: Vec<f64>,

    // --- Derived Data ---
    gradients: Vec<Vec3>,

    // --- Synchronization ---
    // One lock per flat index for concurrent agent writes
    locks: Vec<Mutex<()>>,
}

impl FieldStorage {
    /// Allocates zeroed buffers for `total_boxes` voxels.
    pub fn new(total_boxes: usize, with_midpoint: bool) -> Self {
        FieldStorage {
            current: zeroed(total_boxes),
            next: zeroed(total_boxes),
            midpoint: if with_midpoint { vec![0.0; total_boxes] } else { Vec::new() },
            gradients: vec![Vec3::zero(); total_boxes],
            locks: (0..total_boxes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    #[inline(always)]
    pub fn read(&self, idx: usize) -> f64 {
        self.current[idx].load()
    }

    #[inline(always)]
    pub fn gradient(&self, idx: usize) -> Vec3 {
        self.gradients[idx]
    }

    /// Adds `amount` to a voxel and clamps the result, holding the voxel's lock.
    /// Returns the stored value.
    #[inline]
    pub fn add_clamped(&self, idx: usize, amount: f64, clamp: &ConcentrationClamp) -> f64 {
        let _guard = self.locks[idx].lock();
        let cell = &self.current[idx];
        let value = clamp.apply(cell.load() + amount);
        cell.store(value);
        value
    }

    /// Overwrites a voxel of the current buffer.
    #[inline]
    pub fn set(&mut self, idx: usize, value: f64) {
        self.current[idx].set(value);
    }

    /// Exchanges the current and next buffers. Exclusive access guarantees no
    /// sweep is still running.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }

    /// Views needed by one stencil sweep: read-only current values, writable
    /// next buffer and writable midpoint buffer.
    pub fn sweep_buffers(&mut self) -> (&[AtomicF64], &mut [AtomicF64], &mut [f64]) {
        (self.current.as_slice(), self.next.as_mut_slice(), self.midpoint.as_mut_slice())
    }

    /// Views needed by the gradient pass.
    pub fn gradient_buffers(&mut self) -> (&[AtomicF64], &mut [Vec3]) {
        (self.current.as_slice(), self.gradients.as_mut_slice())
    }

    pub fn gradients(&self) -> &[Vec3] {
        &self.gradients
    }

    pub fn gradients_mut(&mut self) -> &mut [Vec3] {
        &mut self.gradients
    }

    pub fn midpoint(&self) -> &[f64] {
        &self.midpoint
    }

    /// Copy of the current concentration buffer.
    pub fn current_values(&self) -> Vec<f64> {
        self.current.iter().map(AtomicF64::load).collect()
    }

    pub fn total(&self) -> f64 {
        self.current.iter().map(AtomicF64::load).sum()
    }

    /// Replaces every buffer with zeroed storage for `total_boxes` voxels and
    /// hands back the previous concentrations and gradients.
    pub fn reallocate(&mut self, total_boxes: usize) -> (Vec<f64>, Vec<Vec3>) {
        let with_midpoint = !self.midpoint.is_empty();
        log::debug!(
            "Reallocating field storage from {} to {} voxels.",
            self.current.len(),
            total_boxes
        );
        let old_values = self.current_values();
        let old_gradients = std::mem::take(&mut self.gradients);
        *self = FieldStorage::new(total_boxes, with_midpoint);
        (old_values, old_gradients)
    }

    /// Allocates or drops the Runge-Kutta midpoint buffer to match `enabled`.
    pub fn ensure_midpoint(&mut self, enabled: bool) {
        if enabled {
            self.midpoint.resize(self.current.len(), 0.0);
        } else {
            self.midpoint = Vec::new();
        }
    }
}
