//! Bounded-randomized sleep intervals. A fixed beacon period is an easy
//! network signature; every sleep the agent takes goes through here.

use rand::Rng;
use std::time::Duration;

/// Perturb `base` by up to `fraction` of itself in either direction:
/// sleep = base + base * fraction * U with U uniform in [-1, 1]. The
/// fraction is clamped to [0, 1] and any underflow is reflected rather
/// than truncated, so the magnitude survives.
pub fn jittered(base: Duration, fraction: f64) -> Duration {
    let fraction = fraction.clamp(0.0, 1.0);
    if fraction == 0.0 || base.is_zero() {
        return base;
    }

    let u: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    let secs = base.as_secs_f64() * (1.0 + fraction * u);
    Duration::from_secs_f64(secs.abs())
}
