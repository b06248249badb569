//! Landmark smoothing with the 1€ filter
//!
//! See <https://gery.casiez.net/1euro/>.

use std::f32::consts::PI;

use super::Landmark;

/// Shortest time step fed to the filter, in seconds
const MIN_ELAPSED: f32 = 1.0e-3;

/// 1€ filter parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OneEuroFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
}

impl OneEuroFilter {
    /// `min_cutoff` trades jitter for lag; `beta` reduces lag on fast motion.
    pub fn new(min_cutoff: f32, beta: f32) -> Self {
        Self {
            min_cutoff: min_cutoff.max(f32::EPSILON),
            beta: beta.max(0.0),
            d_cutoff: 1.0,
        }
    }

    /// Non-finite samples pass through and leave the state untouched
    fn filter(&self, state: &mut Option<AxisState>, x: f32, elapsed: f32) -> f32 {
        if !x.is_finite() {
            return x;
        }

        match state {
            None => {
                *state = Some(AxisState { x, dx: 0.0 });
                x
            }
            Some(prev) => {
                let a_d = smoothing_factor(elapsed, self.d_cutoff);
                let dx = (x - prev.x) / elapsed;
                let dx_hat = exponential_smoothing(a_d, dx, prev.dx);

                let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
                let a = smoothing_factor(elapsed, cutoff);
                let x_hat = exponential_smoothing(a, x, prev.x);

                prev.x = x_hat;
                prev.dx = dx_hat;
                x_hat
            }
        }
    }
}

impl Default for OneEuroFilter {
    fn default() -> Self {
        Self::new(0.05, 80.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct AxisState {
    x: f32,
    dx: f32,
}

/// Smooths a stream of landmark sets, one filter per coordinate
#[derive(Debug, Default)]
pub struct LandmarkSmoother {
    filter: OneEuroFilter,
    states: Vec<[Option<AxisState>; 3]>,
}

impl LandmarkSmoother {
    pub fn new(filter: OneEuroFilter) -> Self {
        Self {
            filter,
            states: Vec::new(),
        }
    }

    /// Filter one landmark set; `elapsed` is seconds since the previous set
    pub fn smooth(&mut self, landmarks: &[Landmark], elapsed: f32) -> Vec<Landmark> {
        if self.states.len() != landmarks.len() {
            self.states = vec![[None; 3]; landmarks.len()];
        }

        let elapsed = elapsed.max(MIN_ELAPSED);
        landmarks
            .iter()
            .zip(self.states.iter_mut())
            .map(|(landmark, state)| Landmark {
                x: self.filter.filter(&mut state[0], landmark.x, elapsed),
                y: self.filter.filter(&mut state[1], landmark.y, elapsed),
                z: self.filter.filter(&mut state[2], landmark.z, elapsed),
                visibility: landmark.visibility,
            })
            .collect()
    }

    /// Drop filter history, e.g. after the tracked person was lost
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

fn smoothing_factor(t_e: f32, cutoff: f32) -> f32 {
    let r = 2.0 * PI * cutoff * t_e;
    r / (r + 1.0)
}

fn exponential_smoothing(a: f32, x: f32, x_prev: f32) -> f32 {
    a * x + (1.0 - a) * x_prev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_passes_through() {
        let mut smoother = LandmarkSmoother::default();
        let input = vec![Landmark::new(0.3, 0.4), Landmark::new(0.7, 0.4)];
        assert_eq!(smoother.smooth(&input, 1.0 / 30.0), input);
    }

    #[test]
    fn test_jump_is_damped() {
        let mut smoother = LandmarkSmoother::new(OneEuroFilter::new(1.0, 0.0));
        smoother.smooth(&[Landmark::new(0.2, 0.2)], 1.0 / 30.0);
        let out = smoother.smooth(&[Landmark::new(0.8, 0.2)], 1.0 / 30.0);

        assert!(out[0].x > 0.2 && out[0].x < 0.8);
        assert!((out[0].y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_sample_does_not_stick() {
        let mut smoother = LandmarkSmoother::default();
        smoother.smooth(&[Landmark::new(0.3, 0.4)], 1.0 / 30.0);

        let glitch = smoother.smooth(&[Landmark::new(f32::NAN, 0.4)], 1.0 / 30.0);
        assert!(glitch[0].x.is_nan());
        assert!((glitch[0].y - 0.4).abs() < 1e-6);

        let mut out = Vec::new();
        for _ in 0..30 {
            out = smoother.smooth(&[Landmark::new(0.3, 0.4)], 1.0 / 30.0);
        }
        assert!((out[0].x - 0.3).abs() < 1e-6);
        assert!(out[0].is_finite());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut smoother = LandmarkSmoother::new(OneEuroFilter::new(1.0, 0.0));
        smoother.smooth(&[Landmark::new(0.2, 0.2)], 1.0 / 30.0);
        smoother.reset();
        let out = smoother.smooth(&[Landmark::new(0.8, 0.6)], 1.0 / 30.0);
        assert_eq!(out[0].x, 0.8);
        assert_eq!(out[0].y, 0.6);
    }
}
