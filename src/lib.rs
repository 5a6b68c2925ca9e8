//! # Multirotor Control
//! This crate provides the nonlinear control-law stack of a four-rotor aircraft.
//! It turns a desired attitude/altitude setpoint, or a flat-output trajectory and its
//! derivatives, into thrust/torque demands and individual rotor forces.
//! ## Features
//! - Hover-linearized altitude state feedback
//! - Quaternion attitude feedback with shortest-path wrapping and gyroscopic compensation
//! - Fixed control allocation (mixing) matrix and its inverse for X and + frames
//! - Differential-flatness inversion from `x, y, z, yaw` derivatives up to order 4
//! - Setpoint sources (steps, sines, constant, seeded random) and YAML configuration
//!
//! Every per-tick operation works on fixed-size `nalgebra` types and never allocates.
//! ## Example
//! ```
//! use multirotor_control::{config::Config, AttitudeAltitudeController, Reference, State};
//! let ctl = AttitudeAltitudeController::from_config(&Config::default())?;
//! let motor_forces = ctl.run(&State::default(), &Reference::default());
//! assert!((motor_forces.sum() - 0.5 * 9.81).abs() < 1e-9);
//! # Ok::<(), multirotor_control::ControlError>(())
//! ```
pub mod algebra;
pub mod config;
pub mod control;
pub mod flatness;
pub mod setpoint;
pub mod state;

pub use algebra::QuaternionAlgebra;
pub use control::{
    AltitudeController, AttitudeAltitudeController, AttitudeController, AttitudeReference,
    ControlAllocator,
};
pub use flatness::{DifferentialFlatness, FlatOutput, FlatState, Wrench};
pub use setpoint::{EulerAxis, Setpoint};
pub use state::{Reference, State, Trim, VehicleParameters};

#[derive(thiserror::Error, Debug)]
/// Represents errors raised while configuring or evaluating the control laws
pub enum ControlError {
    /// The mixing matrix has no inverse
    #[error("Control allocation matrix is singular")]
    SingularAllocation,
    /// Vehicle or controller parameters out of range
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    /// State or reference vector that does not describe a vehicle attitude
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Flatness inversion hit a vanishing denominator
    #[error("Flatness singularity: {quantity} = {value:e}")]
    FlatnessSingularity {
        /// Name of the denominator, `na` or `c0`
        quantity: &'static str,
        /// Its value at the rejected sample
        value: f64,
    },
    /// NaN or infinity in an input or a result
    #[error("Non-finite {0}")]
    NonFinite(&'static str),
    /// Error reading a configuration file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error parsing a configuration file
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
