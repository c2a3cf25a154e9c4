//! Simulated sensor sources

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

/// Produces one reading per tick
pub trait SensorSource: Send + Sync {
    fn sample(&self) -> f64;
}

impl<F> SensorSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> f64 {
        self()
    }
}

/// Bounded, non-negative noise: `|scale * r1 * (r2 - 0.5)|`, so readings
/// fall in `[0, scale / 2]`.
#[derive(Debug, Clone, Copy)]
pub struct RandomSource {
    scale: f64,
}

impl RandomSource {
    pub const DEFAULT_SCALE: f64 = 70.0;

    pub fn new(scale: f64) -> Self {
        Self { scale: scale.abs() }
    }

    /// Largest value this source can produce
    pub fn upper_bound(&self) -> f64 {
        self.scale / 2.0
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SCALE)
    }
}

impl SensorSource for RandomSource {
    fn sample(&self) -> f64 {
        let mut rng = rand::thread_rng();
        let r1: f64 = rng.r#gen();
        let r2: f64 = rng.r#gen();
        (self.scale * r1 * (r2 - 0.5)).abs()
    }
}

/// Replays a fixed sequence of readings, then repeats the last one
#[derive(Debug)]
pub struct ScriptedSource {
    readings: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedSource {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(0.0),
        }
    }
}

impl SensorSource for ScriptedSource {
    fn sample(&self) -> f64 {
        let mut last = self.last.lock();
        if let Some(next) = self.readings.lock().pop_front() {
            *last = next;
        }
        *last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_source_bounds() {
        let source = RandomSource::default();
        assert_eq!(source.upper_bound(), 35.0);

        for _ in 0..10_000 {
            let v = source.sample();
            assert!((0.0..=35.0).contains(&v), "reading out of range: {v}");
        }
    }

    #[test]
    fn test_scripted_source_repeats_last() {
        let source = ScriptedSource::new([30.0, 19.5]);
        assert_eq!(source.sample(), 30.0);
        assert_eq!(source.sample(), 19.5);
        assert_eq!(source.sample(), 19.5);
    }

    #[test]
    fn test_closure_source() {
        let source = || 4.2;
        assert_eq!(SensorSource::sample(&source), 4.2);
    }
}
