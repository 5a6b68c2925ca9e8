//! Reference sources for the composed attitude/altitude controller.
use crate::algebra::QuaternionAlgebra;
use crate::state::Reference;
use nalgebra::{UnitQuaternion, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

/// Trait defining the interface for per-tick reference sources
pub trait Setpoint {
    /// Reference at time `time` in seconds
    fn get(&mut self, time: f64) -> Reference;
}

/// Square wave of period `period` shifted by `offset`
/// # Returns
/// * `amplitude` during the second half of each period, `-amplitude` otherwise
#[inline]
pub fn step(time: f64, amplitude: f64, period: f64, offset: f64) -> f64 {
    if (time + offset) % period > period / 2.0 {
        amplitude
    } else {
        -amplitude
    }
}

/// Altitude square wave of period 10 s with level attitude
pub struct StepZInput {
    pub amplitude: f64,
}

impl Default for StepZInput {
    fn default() -> Self {
        Self { amplitude: 1.0 }
    }
}

impl Setpoint for StepZInput {
    fn get(&mut self, time: f64) -> Reference {
        Reference::new(
            step(time, self.amplitude, 10.0, 0.0),
            UnitQuaternion::identity(),
        )
    }
}

/// Altitude sine wave with level attitude
pub struct SinZInput {
    pub amplitude: f64,
    /// Angular frequency in rad/s
    pub frequency: f64,
}

impl Default for SinZInput {
    fn default() -> Self {
        Self {
            amplitude: 0.5,
            frequency: 1.0,
        }
    }
}

impl Setpoint for SinZInput {
    fn get(&mut self, time: f64) -> Reference {
        Reference::new(
            self.amplitude * (self.frequency * time).sin(),
            UnitQuaternion::identity(),
        )
    }
}

/// Euler angle driven by [`StepEulerInput`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EulerAxis {
    Roll,
    Pitch,
    Yaw,
}

impl EulerAxis {
    /// Position in the `[roll, pitch, yaw]` vector
    #[inline]
    pub fn index(self) -> usize {
        match self {
            EulerAxis::Roll => 0,
            EulerAxis::Pitch => 1,
            EulerAxis::Yaw => 2,
        }
    }
}

/// Square wave on one Euler angle at zero altitude
pub struct StepEulerInput {
    pub axis: EulerAxis,
    /// Amplitude in radians
    pub amplitude: f64,
    pub period: f64,
    pub offset: f64,
}

impl StepEulerInput {
    /// One degree steps on `axis`, 10 s period, shifted by 5 s
    pub fn new(axis: EulerAxis) -> Self {
        Self {
            axis,
            amplitude: 1.0_f64.to_radians(),
            period: 10.0,
            offset: 5.0,
        }
    }
}

impl Setpoint for StepEulerInput {
    fn get(&mut self, time: f64) -> Reference {
        let mut euler = Vector3::zeros();
        euler[self.axis.index()] = step(time, self.amplitude, self.period, self.offset);
        Reference::new(0.0, UnitQuaternion::from_euler(&euler))
    }
}

/// Fixed altitude and attitude
pub struct ConstantInput {
    reference: Reference,
}

impl ConstantInput {
    /// # Arguments
    /// * `altitude` - Altitude command in meters
    /// * `euler` - Attitude command `[roll, pitch, yaw]` in radians
    pub fn new(altitude: f64, euler: Vector3<f64>) -> Self {
        Self {
            reference: Reference::new(altitude, UnitQuaternion::from_euler(&euler)),
        }
    }
}

impl Setpoint for ConstantInput {
    fn get(&mut self, _time: f64) -> Reference {
        self.reference
    }
}

/// Piecewise-constant random references, redrawn every `pulse_len` seconds
pub struct RandomInput {
    pub pulse_len: f64,
    next_pulse: Option<f64>,
    current: Reference,
    rng: ChaCha8Rng,
    altitude: Uniform<f64>,
    tilt: Uniform<f64>,
    heading: Uniform<f64>,
}

impl RandomInput {
    /// # Arguments
    /// * `pulse_len` - Hold time of each draw in seconds
    /// * `seed` - Seed of the generator, identical seeds give identical sequences
    pub fn new(pulse_len: f64, seed: u64) -> Self {
        let max_tilt = 0.5_f64.to_radians();
        Self {
            pulse_len,
            next_pulse: None,
            current: Reference::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            altitude: Uniform::new(-1.0, 1.0),
            tilt: Uniform::new(-max_tilt, max_tilt),
            heading: Uniform::new(-std::f64::consts::PI, std::f64::consts::PI),
        }
    }

    fn draw(&mut self) -> Reference {
        let altitude = self.altitude.sample(&mut self.rng);
        let roll = self.tilt.sample(&mut self.rng);
        let pitch = self.tilt.sample(&mut self.rng);
        let yaw = self.heading.sample(&mut self.rng);
        Reference::new(
            altitude,
            UnitQuaternion::from_euler(&Vector3::new(roll, pitch, yaw)),
        )
    }
}

impl Setpoint for RandomInput {
    fn get(&mut self, time: f64) -> Reference {
        let next = *self.next_pulse.get_or_insert(time);
        if time >= next {
            self.current = self.draw();
            self.next_pulse = Some(next + self.pulse_len);
            log::trace!("Time: {:.2} s,\tnew random reference", time);
        }
        self.current
    }
}
