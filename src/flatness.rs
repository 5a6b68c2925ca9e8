//! Differential-flatness inversion of the multirotor dynamics.
//!
//! A sample of the flat outputs `x, y, z, yaw` and their time derivatives up to order 4
//! determines the full state and the wrench that keeps the vehicle on that trajectory.
//! The inversion is closed form: the required specific force (and its two derivatives)
//! is rotated into the yaw-aligned frame, roll and pitch are read off its direction, and
//! the Euler rates are mapped to body rates and accelerations. Frame is NED, thrust along
//! body `-z`, drag linear in air-relative velocity.
use crate::algebra::QuaternionAlgebra;
use crate::config::{ensure_positive, Config};
use crate::state::{State, VehicleParameters};
use crate::ControlError;
use nalgebra::{SMatrix, UnitQuaternion, Vector3, Vector4};

/// Number of flat outputs, `x, y, z, yaw`
pub const FLAT_OUTPUTS: usize = 4;
/// Number of derivative orders stored per flat output, `0..=4`
pub const DERIVATIVE_ORDERS: usize = 5;
/// Smallest accepted `na` and `c0` unless configured otherwise
pub const DEFAULT_SINGULARITY_THRESHOLD: f64 = 1e-6;
/// Rows are flat outputs, columns derivative orders
pub type FlatTable = SMatrix<f64, FLAT_OUTPUTS, DERIVATIVE_ORDERS>;

const X: usize = 0;
const Y: usize = 1;
const Z: usize = 2;
const YAW: usize = 3;

/// One sample of a flat trajectory
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlatOutput {
    table: FlatTable,
}

impl FlatOutput {
    /// Wraps a table whose rows are `x, y, z, yaw` and columns derivative orders 0 to 4
    pub fn new(table: FlatTable) -> Self {
        Self { table }
    }
    /// Builds a sample from rows `x, y, z, yaw`, each holding derivative orders 0 to 4
    pub fn from_rows(rows: [[f64; DERIVATIVE_ORDERS]; FLAT_OUTPUTS]) -> Self {
        Self::new(FlatTable::from_fn(|i, j| rows[i][j]))
    }
    /// Stationary sample at `position` with heading `yaw`
    pub fn hover(position: Vector3<f64>, yaw: f64) -> Self {
        let mut table = FlatTable::zeros();
        table.fixed_view_mut::<3, 1>(0, 0).copy_from(&position);
        table[(YAW, 0)] = yaw;
        Self::new(table)
    }
    /// `order`-th time derivative of the position
    #[inline]
    pub fn position(&self, order: usize) -> Vector3<f64> {
        Vector3::new(
            self.table[(X, order)],
            self.table[(Y, order)],
            self.table[(Z, order)],
        )
    }
    /// `order`-th time derivative of the heading
    #[inline]
    pub fn yaw(&self, order: usize) -> f64 {
        self.table[(YAW, order)]
    }
    /// The underlying 4x5 table
    pub fn table(&self) -> &FlatTable {
        &self.table
    }
}

/// Total thrust and axis commands in the units of the control allocation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wrench {
    /// Total thrust in newtons
    pub thrust: f64,
    /// `[Up, Uq, Ur]`: roll and pitch torques over arm length, yaw torque over the
    /// rotor torque coefficient
    pub torque: Vector3<f64>,
}

impl Wrench {
    /// `[Ut, Up, Uq, Ur]`
    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.thrust, self.torque.x, self.torque.y, self.torque.z)
    }
}

/// Result of a flatness inversion
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlatState {
    pub state: State,
    pub wrench: Wrench,
    /// `[roll, pitch, yaw]`
    pub euler: Vector3<f64>,
    /// Body angular acceleration `[p', q', r']`
    pub angular_acceleration: Vector3<f64>,
}

/// Maps flat-output samples to state and wrench
#[derive(Clone, Debug)]
pub struct DifferentialFlatness {
    mass: f64,
    gravity: f64,
    inertia: Vector3<f64>,
    arm_length: f64,
    torque_coefficient: f64,
    drag_over_mass: f64,
    wind: Vector3<f64>,
    singularity_threshold: f64,
}

impl DifferentialFlatness {
    /// Creates an inverter for the given airframe with no wind
    pub fn new(params: &VehicleParameters) -> Self {
        Self {
            mass: params.mass,
            gravity: params.gravity,
            inertia: params.inertia,
            arm_length: params.arm_length,
            torque_coefficient: params.torque_coefficient,
            drag_over_mass: params.drag_over_mass(),
            wind: Vector3::zeros(),
            singularity_threshold: DEFAULT_SINGULARITY_THRESHOLD,
        }
    }
    /// Creates an inverter from the `vehicle` and `flatness` sections
    /// # Errors
    /// * `ControlError::InvalidParameters` if the vehicle or flatness section is invalid
    pub fn from_config(config: &Config) -> Result<Self, ControlError> {
        let params = config.vehicle.parameters()?;
        config.flatness.validate()?;
        Self::new(&params)
            .with_wind(Vector3::from(config.flatness.wind))
            .with_singularity_threshold(config.flatness.singularity_threshold)
    }
    /// Constant wind velocity in the world frame
    pub fn with_wind(mut self, wind: Vector3<f64>) -> Self {
        self.wind = wind;
        self
    }
    /// Smallest accepted value of `na` and `c0`
    /// # Errors
    /// * `ControlError::InvalidParameters` if `threshold` is not finite and positive
    pub fn with_singularity_threshold(mut self, threshold: f64) -> Result<Self, ControlError> {
        ensure_positive("singularity_threshold", threshold)?;
        self.singularity_threshold = threshold;
        Ok(self)
    }
    /// Reconstructs state and wrench from a flat-output sample
    /// # Arguments
    /// * `flat` - Flat outputs and their derivatives up to order 4
    /// # Returns
    /// * The state, wrench, Euler angles and body angular acceleration at that instant
    /// # Errors
    /// * `ControlError::NonFinite` if the sample or the result contains NaN or infinity
    /// * `ControlError::FlatnessSingularity` if the required specific force vanishes
    ///   (`na`) or points exactly along the yaw-frame lateral axis (`c0`)
    pub fn invert(&self, flat: &FlatOutput) -> Result<FlatState, ControlError> {
        if !flat.table().iter().all(|v| v.is_finite()) {
            return Err(ControlError::NonFinite("flat output sample"));
        }
        let cd = self.drag_over_mass;
        // specific thrust force and its derivatives, world frame
        let a0 = flat.position(2) + cd * (flat.position(1) - self.wind)
            - self.gravity * Vector3::z();
        let a1 = flat.position(3) + cd * flat.position(2);
        let a2 = flat.position(4) + cd * flat.position(3);

        let (psi, psi1, psi2) = (flat.yaw(0), flat.yaw(1), flat.yaw(2));
        let (spsi, cpsi) = psi.sin_cos();
        let psi1_sq = psi1 * psi1;
        // same vectors expressed in the yaw-aligned frame
        let b0 = Vector3::new(
            cpsi * a0.x + spsi * a0.y,
            -spsi * a0.x + cpsi * a0.y,
            a0.z,
        );
        let b1 = Vector3::new(
            cpsi * a1.x + spsi * a1.y - psi1 * (spsi * a0.x - cpsi * a0.y),
            -spsi * a1.x + cpsi * a1.y - psi1 * (cpsi * a0.x + spsi * a0.y),
            a1.z,
        );
        let b2 = Vector3::new(
            cpsi * a2.x + spsi * a2.y - 2.0 * psi1 * (spsi * a1.x - cpsi * a1.y)
                + (-psi2 * spsi - psi1_sq * cpsi) * a0.x
                + (psi2 * cpsi - psi1_sq * spsi) * a0.y,
            -spsi * a2.x + cpsi * a2.y - 2.0 * psi1 * (cpsi * a1.x + spsi * a1.y)
                + (-psi2 * cpsi + psi1_sq * spsi) * a0.x
                + (-psi2 * spsi - psi1_sq * cpsi) * a0.y,
            a2.z,
        );

        let n2a = a0.norm_squared();
        let na = n2a.sqrt();
        self.check_denominator("na", na)?;
        let c0 = (b0.x * b0.x + b0.z * b0.z).sqrt();
        self.check_denominator("c0", c0)?;
        let c1 = (b0.x * b1.x + b0.z * b1.z) / c0;
        let c2 = (b1.x * b1.x + b0.x * b2.x + b1.z * b1.z + b0.z * b2.z - c1 * c1) / c0;
        let c0_sq = c0 * c0;
        let b0_dot_b1 = b0.dot(&b1);

        let phi0 = -signum_or_zero(b0.z) * (b0.y / c0).atan();
        let theta0 = (b0.x / b0.z).atan();
        let phi1 = (b1.y * c0 - b0.y * c1) / n2a;
        let theta1 = (b1.x * b0.z - b0.x * b1.z) / c0_sq;
        let phi2 = (b2.y * c0 - b0.y * c2) / n2a
            - 2.0 * (b1.y * c0 - b0.y * c1) * b0_dot_b1 / (n2a * n2a);
        let theta2 = (b2.x * b0.z - b0.x * b2.z) / c0_sq
            - 2.0 * (b1.x * b0.z - b0.x * b1.z) * (b0.x * b1.x + b0.z * b1.z) / (c0_sq * c0_sq);

        let (sph, cph) = phi0.sin_cos();
        let (sth, cth) = theta0.sin_cos();
        // Euler rates to body rates, ZYX
        let p = phi1 - sth * psi1;
        let q = cph * theta1 + sph * cth * psi1;
        let r = -sph * theta1 + cph * cth * psi1;
        let p1 = phi2 - cth * theta1 * psi1 - sth * psi2;
        let q1 = -sph * phi1 * theta1 + cph * theta2 + cph * cth * phi1 * psi1
            - sph * sth * theta1 * psi1
            + sph * cth * psi2;
        let r1 = -cph * phi1 * theta1 - sph * theta2 - sph * cth * phi1 * psi1
            - cph * sth * theta1 * psi1
            + cph * cth * psi2;

        let euler = Vector3::new(phi0, theta0, psi);
        let rates = Vector3::new(p, q, r);
        let angular_acceleration = Vector3::new(p1, q1, r1);
        let state = State {
            position: flat.position(0),
            velocity: flat.position(1),
            orientation: UnitQuaternion::from_euler(&euler),
            angular_velocity: rates,
        };
        let j = self.inertia;
        let wrench = Wrench {
            thrust: na * self.mass,
            torque: Vector3::new(
                (j.x * p1 + (j.z - j.y) * q * r) / self.arm_length,
                (j.y * q1 + (j.x - j.z) * p * r) / self.arm_length,
                (j.z * r1 + (j.y - j.x) * p * q) / self.torque_coefficient,
            ),
        };
        let finite = euler.iter().all(|v| v.is_finite())
            && rates.iter().all(|v| v.is_finite())
            && angular_acceleration.iter().all(|v| v.is_finite())
            && wrench.to_vector().iter().all(|v| v.is_finite());
        if !finite {
            return Err(ControlError::NonFinite("flatness inversion result"));
        }
        Ok(FlatState {
            state,
            wrench,
            euler,
            angular_acceleration,
        })
    }

    fn check_denominator(&self, quantity: &'static str, value: f64) -> Result<(), ControlError> {
        if value < self.singularity_threshold {
            log::warn!(
                "Flatness inversion rejected: {} = {:e} below {:e}",
                quantity,
                value,
                self.singularity_threshold
            );
            return Err(ControlError::FlatnessSingularity { quantity, value });
        }
        Ok(())
    }
}

/// Sign with `0` mapped to `0`, unlike `f64::signum`
#[inline]
fn signum_or_zero(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}
