//! Randomized timing bounds.

use rand::RngCore;

/// A value in `[min, max)` computed as `next_u32() % (max - min) + min`.
///
/// The upper bound is never produced and the modulo reduction slightly
/// favours low values when the range is not a power of two.  Dwell and
/// peck-count distributions depend on exactly this behaviour.
///
/// An empty or inverted range (`max <= min`) yields `min`.
pub fn random_in_range<R: RngCore + ?Sized>(rng: &mut R, min: u32, max: u32) -> u32 {
    if max <= min {
        return min;
    }
    rng.next_u32() % (max - min) + min
}
