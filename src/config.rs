use crate::flatness::DEFAULT_SINGULARITY_THRESHOLD;
use crate::state::{VehicleParameters, STATE_SIZE};
use crate::ControlError;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;

#[derive(Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub vehicle: VehicleConfig,
    pub altitude: AltitudeGains,
    pub attitude: AttitudeGains,
    pub allocation: AllocationConfig,
    pub flatness: FlatnessConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct VehicleConfig {
    pub mass: f64,
    pub gravity: f64,
    pub inertia: [f64; 3],
    pub arm_length: f64,
    pub torque_coefficient: f64,
    pub drag_coefficient: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            mass: 0.5,
            gravity: 9.81,
            inertia: [0.0047, 0.0047, 0.0088],
            arm_length: 0.25,
            torque_coefficient: 0.1,
            drag_coefficient: 0.2,
        }
    }
}

impl VehicleConfig {
    /// Validates the section into immutable parameters
    pub fn parameters(&self) -> Result<VehicleParameters, ControlError> {
        VehicleParameters::new(
            self.mass,
            self.gravity,
            self.inertia,
            self.arm_length,
            self.torque_coefficient,
            self.drag_coefficient,
        )
    }
}

/// Gains of the hover-linearized altitude loop
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AltitudeGains {
    /// State-feedback row `K` acting on `X - Xe`
    pub state_gain: [f64; STATE_SIZE],
    /// Feedforward gain `H` on the altitude command
    pub command_gain: f64,
}

impl Default for AltitudeGains {
    fn default() -> Self {
        let mut state_gain = [0.0; STATE_SIZE];
        state_gain[2] = -1.5;
        state_gain[5] = -1.5;
        Self {
            state_gain,
            command_gain: -1.5,
        }
    }
}

impl AltitudeGains {
    /// Checks that every gain is finite
    /// # Errors
    /// * `ControlError::InvalidParameters` naming the first non-finite gain
    pub fn validate(&self) -> Result<(), ControlError> {
        if let Some(i) = self.state_gain.iter().position(|k| !k.is_finite()) {
            return Err(ControlError::InvalidParameters(format!(
                "altitude.state_gain[{}] must be finite, got {}",
                i, self.state_gain[i]
            )));
        }
        if !self.command_gain.is_finite() {
            return Err(ControlError::InvalidParameters(format!(
                "altitude.command_gain must be finite, got {}",
                self.command_gain
            )));
        }
        Ok(())
    }
}

/// Second-order reference model of the attitude loop, per body axis
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AttitudeGains {
    /// Natural frequency in rad/s
    pub natural_frequency: [f64; 3],
    /// Damping ratio
    pub damping_ratio: [f64; 3],
}

impl Default for AttitudeGains {
    fn default() -> Self {
        Self {
            natural_frequency: [20.0, 20.0, 15.0],
            damping_ratio: [0.7, 0.7, 0.7],
        }
    }
}

impl AttitudeGains {
    /// Checks that natural frequencies and damping ratios are finite and positive
    pub fn validate(&self) -> Result<(), ControlError> {
        for (i, (&omega, &xi)) in self
            .natural_frequency
            .iter()
            .zip(self.damping_ratio.iter())
            .enumerate()
        {
            ensure_positive(&format!("attitude.natural_frequency[{}]", i), omega)?;
            ensure_positive(&format!("attitude.damping_ratio[{}]", i), xi)?;
        }
        Ok(())
    }
}

#[derive(Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameGeometry {
    /// Rotors on the diagonals
    #[default]
    X,
    /// Rotors on the body axes, ordered front, right, back, left
    Plus,
}

#[derive(Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    pub frame: FrameGeometry,
    /// Row-major mixing matrix overriding `frame` when present
    pub matrix: Option<[[f64; 4]; 4]>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FlatnessConfig {
    /// Constant wind velocity in the world frame, m/s
    pub wind: [f64; 3],
    /// Smallest accepted value of the singular denominators
    pub singularity_threshold: f64,
}

impl Default for FlatnessConfig {
    fn default() -> Self {
        Self {
            wind: [0.0; 3],
            singularity_threshold: DEFAULT_SINGULARITY_THRESHOLD,
        }
    }
}

impl FlatnessConfig {
    /// Checks that the wind is finite and the threshold finite and positive
    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.wind.iter().all(|w| w.is_finite()) {
            return Err(ControlError::InvalidParameters(format!(
                "flatness.wind must be finite, got {:?}",
                self.wind
            )));
        }
        ensure_positive("flatness.singularity_threshold", self.singularity_threshold)
    }
}

/// Rejects NaN, infinite, zero and negative values of the parameter `name`
pub(crate) fn ensure_positive(name: &str, value: f64) -> Result<(), ControlError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ControlError::InvalidParameters(format!(
            "{} must be finite and positive, got {}",
            name, value
        )));
    }
    Ok(())
}

impl Config {
    /// Loads and validates a configuration file
    /// # Errors
    /// * `ControlError::Io` if the file cannot be read
    /// * `ControlError::Yaml` if it does not parse
    /// * `ControlError::InvalidParameters` if any section fails [`Config::validate`]
    pub fn from_yaml(filename: &str) -> Result<Self, ControlError> {
        let mut contents = String::new();
        File::open(filename)?.read_to_string(&mut contents)?;
        let config = Self::from_yaml_str(&contents)?;
        log::debug!("Loaded controller configuration from {}", filename);
        Ok(config)
    }

    /// Parses and validates configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ControlError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the vehicle, gain and flatness sections
    pub fn validate(&self) -> Result<(), ControlError> {
        self.vehicle.parameters()?;
        self.altitude.validate()?;
        self.attitude.validate()?;
        self.flatness.validate()
    }
}
