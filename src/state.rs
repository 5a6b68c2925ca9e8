//! Vehicle state, inertial parameters, hover trim and per-tick references.
use crate::algebra::{quat_from_wxyz, quat_to_wxyz};
use crate::ControlError;
use nalgebra::{SVector, UnitQuaternion, Vector3, Vector4};

/// Length of the flat state vector
pub const STATE_SIZE: usize = 13;
/// Offset of the position slice `[x, y, z]`
pub const POSITION_OFFSET: usize = 0;
/// Offset of the velocity slice `[vx, vy, vz]`
pub const VELOCITY_OFFSET: usize = 3;
/// Offset of the attitude quaternion slice `[w, x, y, z]`
pub const QUATERNION_OFFSET: usize = 6;
/// Offset of the body rate slice `[p, q, r]`
pub const RATE_OFFSET: usize = 10;
/// Length of the flat reference vector `[z, qw, qx, qy, qz]`
pub const REFERENCE_SIZE: usize = 5;

/// Flat 13-element state vector
pub type StateVector = SVector<f64, STATE_SIZE>;
/// Flat 5-element reference vector
pub type ReferenceVector = SVector<f64, REFERENCE_SIZE>;

/// Rigid-body state of the multirotor in a NED world frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct State {
    /// Position in meters, z down
    pub position: Vector3<f64>,
    /// Velocity in m/s
    pub velocity: Vector3<f64>,
    /// Body-to-world attitude
    pub orientation: UnitQuaternion<f64>,
    /// Body angular rate `[p, q, r]` in rad/s
    pub angular_velocity: Vector3<f64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl State {
    /// Flattens the state into the 13-vector layout
    pub fn to_vector(&self) -> StateVector {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<3>(POSITION_OFFSET)
            .copy_from(&self.position);
        x.fixed_rows_mut::<3>(VELOCITY_OFFSET)
            .copy_from(&self.velocity);
        x.fixed_rows_mut::<4>(QUATERNION_OFFSET)
            .copy_from(&Vector4::from(quat_to_wxyz(&self.orientation)));
        x.fixed_rows_mut::<3>(RATE_OFFSET)
            .copy_from(&self.angular_velocity);
        x
    }
    /// Rebuilds a state from the 13-vector layout
    /// # Arguments
    /// * `x` - Flat state, quaternion at offsets 6..10 in `w, x, y, z` order
    /// # Returns
    /// * The state with its quaternion renormalized
    /// # Errors
    /// * `ControlError::InvalidState` if the quaternion slice has zero or non-finite norm
    pub fn from_vector(x: &StateVector) -> Result<Self, ControlError> {
        let q = x.fixed_rows::<4>(QUATERNION_OFFSET);
        let orientation = quat_from_wxyz(q[0], q[1], q[2], q[3]).ok_or_else(|| {
            ControlError::InvalidState("attitude quaternion has zero or non-finite norm".into())
        })?;
        Ok(Self {
            position: x.fixed_rows::<3>(POSITION_OFFSET).into_owned(),
            velocity: x.fixed_rows::<3>(VELOCITY_OFFSET).into_owned(),
            orientation,
            angular_velocity: x.fixed_rows::<3>(RATE_OFFSET).into_owned(),
        })
    }
}

/// Immutable inertial and geometric parameters of the airframe
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleParameters {
    /// Mass in kg
    pub mass: f64,
    /// Gravitational acceleration in m/s^2
    pub gravity: f64,
    /// Diagonal of the inertia tensor `[Jxx, Jyy, Jzz]` in kg m^2
    pub inertia: Vector3<f64>,
    /// Arm length converting roll/pitch torques to rotor forces, in m
    pub arm_length: f64,
    /// Rotor drag torque to thrust ratio converting yaw torque to rotor forces, in m
    pub torque_coefficient: f64,
    /// Linear drag coefficient in kg/s
    pub drag_coefficient: f64,
}

impl VehicleParameters {
    /// Creates a validated parameter set
    /// # Errors
    /// * `ControlError::InvalidParameters` if any value is non-finite, if mass, inertia,
    ///   arm length or torque coefficient are not strictly positive, or if drag or
    ///   gravity are negative
    pub fn new(
        mass: f64,
        gravity: f64,
        inertia: [f64; 3],
        arm_length: f64,
        torque_coefficient: f64,
        drag_coefficient: f64,
    ) -> Result<Self, ControlError> {
        let params = Self {
            mass,
            gravity,
            inertia: Vector3::from(inertia),
            arm_length,
            torque_coefficient,
            drag_coefficient,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the invariants listed on [`VehicleParameters::new`]
    pub fn validate(&self) -> Result<(), ControlError> {
        let positive = [
            ("mass", self.mass),
            ("inertia.xx", self.inertia.x),
            ("inertia.yy", self.inertia.y),
            ("inertia.zz", self.inertia.z),
            ("arm_length", self.arm_length),
            ("torque_coefficient", self.torque_coefficient),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ControlError::InvalidParameters(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("gravity", self.gravity),
            ("drag_coefficient", self.drag_coefficient),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ControlError::InvalidParameters(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
    /// Linear drag per unit mass, in 1/s
    #[inline]
    pub fn drag_over_mass(&self) -> f64 {
        self.drag_coefficient / self.mass
    }
}

/// Hover equilibrium used as the linearization point of the altitude loop
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trim {
    /// Equilibrium state
    pub state: State,
    /// Equilibrium rotor forces, one per motor
    pub input: Vector4<f64>,
}

impl Trim {
    /// Level hover at the origin with the weight shared equally by the four rotors
    pub fn hover(params: &VehicleParameters) -> Self {
        Self {
            state: State::default(),
            input: Vector4::repeat(params.mass * params.gravity / 4.0),
        }
    }
    /// Total thrust at trim, the feedforward bias of the altitude loop
    #[inline]
    pub fn hover_thrust(&self) -> f64 {
        self.input.sum()
    }
}

/// Per-tick command of the composed controller
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reference {
    /// Altitude command in meters
    pub altitude: f64,
    /// Attitude command
    pub attitude: UnitQuaternion<f64>,
}

impl Default for Reference {
    fn default() -> Self {
        Self {
            altitude: 0.0,
            attitude: UnitQuaternion::identity(),
        }
    }
}

impl Reference {
    /// Pairs an altitude command with an attitude command
    pub fn new(altitude: f64, attitude: UnitQuaternion<f64>) -> Self {
        Self { altitude, attitude }
    }

    /// Splits a `[z, qw, qx, qy, qz]` vector
    /// # Errors
    /// * `ControlError::InvalidState` if the quaternion part has zero or non-finite norm
    pub fn from_vector(yc: &ReferenceVector) -> Result<Self, ControlError> {
        let attitude = quat_from_wxyz(yc[1], yc[2], yc[3], yc[4]).ok_or_else(|| {
            ControlError::InvalidState("reference quaternion has zero or non-finite norm".into())
        })?;
        Ok(Self {
            altitude: yc[0],
            attitude,
        })
    }
    /// Flattens into `[z, qw, qx, qy, qz]`
    pub fn to_vector(&self) -> ReferenceVector {
        let [w, x, y, z] = quat_to_wxyz(&self.attitude);
        ReferenceVector::new(self.altitude, w, x, y, z)
    }
}
