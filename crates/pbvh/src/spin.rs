//! Spin-locked three-component accumulator.
//!
//! The x component doubles as the lock: while a writer holds it, x stores a
//! signaling-NaN bit pattern that float arithmetic never produces. Only for
//! low contention; writers busy-wait.

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

/// Bit pattern of x while locked
const LOCKED: u32 = 0x7f80_0001;

/// Bits to store for x; every NaN maps to the quiet NaN so no value can
/// look locked
fn x_bits(x: f32) -> u32 {
    if x.is_nan() { f32::NAN.to_bits() } else { x.to_bits() }
}

#[derive(Debug)]
pub struct SpinVec3 {
    x: AtomicU32,
    y: AtomicU32,
    z: AtomicU32,
}

impl Default for SpinVec3 {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

impl SpinVec3 {
    pub fn new(value: Vec3) -> Self {
        Self {
            x: AtomicU32::new(x_bits(value.x)),
            y: AtomicU32::new(value.y.to_bits()),
            z: AtomicU32::new(value.z.to_bits()),
        }
    }

    /// Acquire the lock, returning the x bits it replaced
    fn lock(&self) -> u32 {
        loop {
            let current = self.x.load(Ordering::Relaxed);
            if current != LOCKED
                && self
                    .x
                    .compare_exchange_weak(current, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return current;
            }
            hint::spin_loop();
        }
    }

    /// Add `value` to the stored vector
    pub fn add(&self, value: Vec3) {
        let x = f32::from_bits(self.lock());
        let y = f32::from_bits(self.y.load(Ordering::Relaxed));
        let z = f32::from_bits(self.z.load(Ordering::Relaxed));
        self.y.store((y + value.y).to_bits(), Ordering::Relaxed);
        self.z.store((z + value.z).to_bits(), Ordering::Relaxed);
        // Publishing x releases the lock
        self.x.store(x_bits(x + value.x), Ordering::Release);
    }

    /// Consistent snapshot of the stored vector
    pub fn load(&self) -> Vec3 {
        let x = self.lock();
        let value = Vec3::new(
            f32::from_bits(x),
            f32::from_bits(self.y.load(Ordering::Relaxed)),
            f32::from_bits(self.z.load(Ordering::Relaxed)),
        );
        self.x.store(x, Ordering::Release);
        value
    }

    pub fn into_inner(self) -> Vec3 {
        Vec3::new(
            f32::from_bits(self.x.into_inner()),
            f32::from_bits(self.y.into_inner()),
            f32::from_bits(self.z.into_inner()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_sequential_add() {
        let acc = SpinVec3::default();
        acc.add(Vec3::new(1.0, 2.0, 3.0));
        acc.add(Vec3::new(0.5, -2.0, 1.0));
        assert_eq!(acc.load(), Vec3::new(1.5, 0.0, 4.0));
        assert_eq!(acc.into_inner(), Vec3::new(1.5, 0.0, 4.0));
    }

    #[test]
    fn test_parallel_add_is_exact_for_integers() {
        let acc = SpinVec3::new(Vec3::ZERO);
        (0..10_000).into_par_iter().for_each(|_| acc.add(Vec3::new(1.0, 2.0, -1.0)));
        assert_eq!(acc.into_inner(), Vec3::new(10_000.0, 20_000.0, -10_000.0));
    }

    #[test]
    fn test_nan_input_does_not_deadlock() {
        let acc = SpinVec3::default();
        acc.add(Vec3::new(f32::NAN, 0.0, 0.0));
        acc.add(Vec3::X);
        assert!(acc.load().x.is_nan());
    }

    #[test]
    fn test_lock_pattern_as_initial_value() {
        let acc = SpinVec3::new(Vec3::new(f32::from_bits(LOCKED), 1.0, 2.0));
        acc.add(Vec3::ONE);
        let value = acc.load();
        assert!(value.x.is_nan());
        assert_eq!((value.y, value.z), (2.0, 3.0));

        let acc = SpinVec3::default();
        acc.add(Vec3::new(f32::from_bits(LOCKED), 0.0, 0.0));
        assert!(acc.into_inner().x.is_nan());
    }
}
