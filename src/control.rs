//! Feedback control laws and control allocation.
//!
//! The composed [`AttitudeAltitudeController`] is the per-tick entry point: it runs the
//! altitude loop and the quaternion attitude loop, stacks their outputs into
//! `[Uz, Up, Uq, Ur]` and mixes them into four rotor forces.
use crate::algebra::QuaternionAlgebra;
use crate::config::{AltitudeGains, AttitudeGains, Config, FrameGeometry};
use crate::state::{Reference, State, StateVector, Trim, VehicleParameters};
use crate::ControlError;
use nalgebra::{Matrix4, UnitQuaternion, Vector3, Vector4};

/// Linear state feedback on the vertical channel, linearized about hover
/// `Fbz = Fez - K (X - Xe) + H zc`
#[derive(Clone, Debug)]
pub struct AltitudeController {
    /// Trim thrust `Fez`
    hover_thrust: f64,
    /// Trim state `Xe`
    trim_state: StateVector,
    /// State-feedback row `K`
    state_gain: StateVector,
    /// Command feedforward `H`
    command_gain: f64,
}

impl AltitudeController {
    /// Creates the loop around `trim` with the feedback row and feedforward in `gains`
    pub fn new(trim: &Trim, gains: &AltitudeGains) -> Self {
        Self {
            hover_thrust: trim.hover_thrust(),
            trim_state: trim.state.to_vector(),
            state_gain: StateVector::from(gains.state_gain),
            command_gain: gains.command_gain,
        }
    }
    /// Computes the collective force command
    /// # Arguments
    /// * `state` - Current vehicle state
    /// * `altitude` - Altitude command `zc` in meters (NED, positive down)
    /// # Returns
    /// * Total thrust demand `Fbz` in newtons
    pub fn run(&self, state: &State, altitude: f64) -> f64 {
        let deviation = state.to_vector() - self.trim_state;
        self.hover_thrust - self.state_gain.dot(&deviation) + self.command_gain * altitude
    }
    /// Trim thrust `Fez` in newtons
    pub fn hover_thrust(&self) -> f64 {
        self.hover_thrust
    }
}

/// Quaternion attitude loop with gyroscopic compensation
#[derive(Clone, Debug)]
pub struct AttitudeController {
    /// Per-axis natural frequency of the reference model
    omega: Vector3<f64>,
    /// Per-axis damping ratio of the reference model
    xi: Vector3<f64>,
    /// `[(Jzz-Jyy)/Jxx, (Jxx-Jzz)/Jyy, (Jyy-Jxx)/Jzz]`
    coupling: Vector3<f64>,
    /// `[Jxx/l, Jyy/l, Jzz/k]`
    inertia_scale: Vector3<f64>,
}

impl AttitudeController {
    /// Creates the loop for the airframe in `params`
    /// # Arguments
    /// * `params` - Inertia, arm length and torque coefficient of the vehicle
    /// * `gains` - Natural frequency and damping ratio per body axis
    pub fn new(params: &VehicleParameters, gains: &AttitudeGains) -> Self {
        let j = params.inertia;
        Self {
            omega: Vector3::from(gains.natural_frequency),
            xi: Vector3::from(gains.damping_ratio),
            coupling: Vector3::new(
                (j.z - j.y) / j.x,
                (j.x - j.z) / j.y,
                (j.y - j.x) / j.z,
            ),
            inertia_scale: Vector3::new(
                j.x / params.arm_length,
                j.y / params.arm_length,
                j.z / params.torque_coefficient,
            ),
        }
    }
    /// Attitude command toward `reference` with zero reference rate
    pub fn run(&self, state: &State, reference: &UnitQuaternion<f64>) -> Vector3<f64> {
        self.run_with_rate(state, reference, &Vector3::zeros())
    }
    /// Computes the `[Up, Uq, Ur]` command
    /// # Arguments
    /// * `state` - Current vehicle state
    /// * `reference` - Reference attitude
    /// * `reference_rate` - Reference body rate in rad/s
    /// # Returns
    /// * Roll and pitch commands scaled by the arm length, yaw command scaled by the
    ///   rotor torque coefficient, in the force units the mixer expects
    pub fn run_with_rate(
        &self,
        state: &State,
        reference: &UnitQuaternion<f64>,
        reference_rate: &Vector3<f64>,
    ) -> Vector3<f64> {
        let error = state
            .orientation
            .inverse_compose(reference)
            .wrap_shortest();
        let rate_error = state.angular_velocity - reference_rate;
        let omega_sq = self.omega.component_mul(&self.omega);
        let damping = 2.0 * self.omega.component_mul(&self.xi);
        let angular_acceleration =
            omega_sq.component_mul(&error.imag()) - damping.component_mul(&rate_error);
        let pqr = &state.angular_velocity;
        let gyroscopic = self.coupling.component_mul(&Vector3::new(
            pqr.y * pqr.z,
            pqr.x * pqr.z,
            pqr.x * pqr.y,
        ));
        self.inertia_scale
            .component_mul(&(angular_acceleration + gyroscopic))
    }
}

/// Integrates a commanded body rate into a smooth reference attitude
#[derive(Clone, Debug)]
pub struct AttitudeReference {
    orientation: UnitQuaternion<f64>,
    rate: Vector3<f64>,
}

impl Default for AttitudeReference {
    fn default() -> Self {
        Self::new(UnitQuaternion::identity())
    }
}

impl AttitudeReference {
    /// Starts at `orientation` with zero rate
    pub fn new(orientation: UnitQuaternion<f64>) -> Self {
        Self {
            orientation,
            rate: Vector3::zeros(),
        }
    }
    /// Advances the reference by `dt` seconds at `rate` and stores `rate` as current
    pub fn run(&mut self, rate: &Vector3<f64>, dt: f64) {
        self.orientation = self.orientation.integrate(rate, dt);
        self.rate = *rate;
    }
    /// Current reference attitude
    pub fn orientation(&self) -> &UnitQuaternion<f64> {
        &self.orientation
    }
    /// Rate applied by the last [`AttitudeReference::run`]
    pub fn rate(&self) -> &Vector3<f64> {
        &self.rate
    }
    /// Jumps to `orientation` and clears the rate
    pub fn reset(&mut self, orientation: UnitQuaternion<f64>) {
        self.orientation = orientation;
        self.rate = Vector3::zeros();
    }
}

/// Fixed mixing between `[Uz, Up, Uq, Ur]` and the four rotor forces
#[derive(Clone, Debug)]
pub struct ControlAllocator {
    matrix: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

impl ControlAllocator {
    /// Creates an allocator from a mixing matrix, rows are motors and columns are
    /// collective, roll, pitch and yaw
    /// # Errors
    /// * `ControlError::SingularAllocation` if the matrix cannot be inverted
    pub fn new(matrix: Matrix4<f64>) -> Result<Self, ControlError> {
        let inverse = matrix
            .try_inverse()
            .ok_or(ControlError::SingularAllocation)?;
        log::debug!("Control allocation matrix: {}", matrix);
        Ok(Self { matrix, inverse })
    }
    /// Creates an allocator for a standard four-rotor frame
    pub fn from_geometry(frame: FrameGeometry) -> Result<Self, ControlError> {
        Self::new(Self::geometry_matrix(frame))
    }

    /// Mixing matrix of a standard four-rotor frame
    pub fn geometry_matrix(frame: FrameGeometry) -> Matrix4<f64> {
        match frame {
            // front right, back right, back left, front left
            FrameGeometry::X => Matrix4::new(
                0.25, -1.0, 1.0, -1.0, //
                0.25, -1.0, -1.0, 1.0, //
                0.25, 1.0, -1.0, -1.0, //
                0.25, 1.0, 1.0, 1.0,
            ),
            // front, right, back, left
            FrameGeometry::Plus => Matrix4::new(
                0.25, 0.0, 1.0, -1.0, //
                0.25, -1.0, 0.0, 1.0, //
                0.25, 0.0, -1.0, -1.0, //
                0.25, 1.0, 0.0, 1.0,
            ),
        }
    }
    /// Maps axis commands to rotor forces
    #[inline]
    pub fn allocate(&self, collective: f64, torques: &Vector3<f64>) -> Vector4<f64> {
        self.allocate_vector(&Vector4::new(collective, torques.x, torques.y, torques.z))
    }

    /// Maps stacked `[Uz, Up, Uq, Ur]` to rotor forces
    #[inline]
    pub fn allocate_vector(&self, axis_commands: &Vector4<f64>) -> Vector4<f64> {
        self.matrix * axis_commands
    }
    /// Recovers `[Uz, Up, Uq, Ur]` from rotor forces
    #[inline]
    pub fn deallocate(&self, motor_forces: &Vector4<f64>) -> Vector4<f64> {
        self.inverse * motor_forces
    }
    /// Mixing matrix `H`
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }
    /// Inverse mixing matrix `H^-1`
    pub fn inverse_matrix(&self) -> &Matrix4<f64> {
        &self.inverse
    }
}

/// Altitude and attitude loops composed with the mixer
#[derive(Clone, Debug)]
pub struct AttitudeAltitudeController {
    pub altitude: AltitudeController,
    pub attitude: AttitudeController,
    pub allocator: ControlAllocator,
}

impl AttitudeAltitudeController {
    /// Composes the two loops with `allocator`, gains are taken as given
    pub fn new(
        trim: &Trim,
        params: &VehicleParameters,
        altitude_gains: &AltitudeGains,
        attitude_gains: &AttitudeGains,
        allocator: ControlAllocator,
    ) -> Self {
        Self {
            altitude: AltitudeController::new(trim, altitude_gains),
            attitude: AttitudeController::new(params, attitude_gains),
            allocator,
        }
    }
    /// Builds the controller around the hover trim of the configured vehicle
    /// # Errors
    /// * `ControlError::InvalidParameters` if the vehicle or a gain section is invalid
    /// * `ControlError::SingularAllocation` if the mixing matrix cannot be inverted
    pub fn from_config(config: &Config) -> Result<Self, ControlError> {
        let params = config.vehicle.parameters()?;
        config.altitude.validate()?;
        config.attitude.validate()?;
        let trim = Trim::hover(&params);
        let allocator = match config.allocation.matrix {
            Some(rows) => ControlAllocator::new(Matrix4::from_fn(|i, j| rows[i][j]))?,
            None => ControlAllocator::from_geometry(config.allocation.frame)?,
        };
        log::debug!(
            "Attitude/altitude controller: hover thrust {:.3} N, mass {:.3} kg",
            trim.hover_thrust(),
            params.mass
        );
        Ok(Self::new(
            &trim,
            &params,
            &config.altitude,
            &config.attitude,
            allocator,
        ))
    }
    /// Axis commands `[Uz, Up, Uq, Ur]` before mixing
    pub fn axis_commands(&self, state: &State, reference: &Reference) -> Vector4<f64> {
        let uz = self.altitude.run(state, reference.altitude);
        let upqr = self.attitude.run(state, &reference.attitude);
        Vector4::new(uz, upqr.x, upqr.y, upqr.z)
    }
    /// Computes the four rotor force commands for one control tick
    pub fn run(&self, state: &State, reference: &Reference) -> Vector4<f64> {
        let axis_commands = self.axis_commands(state, reference);
        let motor_forces = self.allocator.allocate_vector(&axis_commands);
        log::trace!(
            "U_zpqr = [{:.4}, {:.4}, {:.4}, {:.4}], motors = [{:.4}, {:.4}, {:.4}, {:.4}]",
            axis_commands[0],
            axis_commands[1],
            axis_commands[2],
            axis_commands[3],
            motor_forces[0],
            motor_forces[1],
            motor_forces[2],
            motor_forces[3]
        );
        motor_forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::negate;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn params() -> VehicleParameters {
        VehicleParameters::new(0.5, 9.81, [0.0047, 0.0047, 0.0088], 0.25, 0.1, 0.2).unwrap()
    }

    fn attitude_controller() -> AttitudeController {
        AttitudeController::new(&params(), &AttitudeGains::default())
    }

    fn tilted_state() -> State {
        State {
            position: Vector3::new(0.3, -0.2, -1.0),
            velocity: Vector3::new(0.1, 0.0, 0.4),
            orientation: UnitQuaternion::from_euler(&Vector3::new(0.2, -0.1, 1.3)),
            angular_velocity: Vector3::new(0.5, -0.3, 0.8),
        }
    }

    #[test]
    fn altitude_at_hover_returns_trim_thrust() {
        let p = params();
        let trim = Trim::hover(&p);
        let ctl = AltitudeController::new(&trim, &AltitudeGains::default());
        assert_relative_eq!(ctl.run(&trim.state, 0.0), p.mass * p.gravity, epsilon = 1e-12);
    }

    #[test]
    fn altitude_feedback_only_on_vertical_channel() {
        let trim = Trim::hover(&params());
        let ctl = AltitudeController::new(&trim, &AltitudeGains::default());
        let mut state = trim.state;
        state.position.x = 3.0;
        state.velocity.y = -2.0;
        state.angular_velocity = Vector3::new(1.0, 1.0, 1.0);
        assert_relative_eq!(ctl.run(&state, 0.0), ctl.hover_thrust(), epsilon = 1e-12);
        // below the trim point (z positive down) more thrust is demanded
        state.position.z = 1.0;
        assert_relative_eq!(ctl.run(&state, 0.0), ctl.hover_thrust() + 1.5, epsilon = 1e-12);
        state.velocity.z = 2.0;
        assert_relative_eq!(
            ctl.run(&state, 1.0),
            ctl.hover_thrust() + 1.5 + 3.0 - 1.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn attitude_zero_error_gives_zero_command() {
        let ctl = attitude_controller();
        let mut state = tilted_state();
        state.angular_velocity = Vector3::zeros();
        let u = ctl.run(&state, &state.orientation);
        assert_relative_eq!(u, Vector3::zeros(), epsilon = 1e-12);
        // matching non-zero reference rate also cancels
        state.angular_velocity = Vector3::new(0.2, 0.0, 0.0);
        let u = ctl.run_with_rate(&state, &state.orientation, &Vector3::new(0.2, 0.0, 0.0));
        assert_relative_eq!(u, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn attitude_double_cover_invariance() {
        let ctl = attitude_controller();
        let state = tilted_state();
        let reference = UnitQuaternion::from_euler(&Vector3::new(-0.4, 0.3, -2.9));
        let u = ctl.run(&state, &reference);
        let u_neg_ref = ctl.run(&state, &negate(&reference));
        let mut flipped = state;
        flipped.orientation = negate(&state.orientation);
        let u_neg_state = ctl.run(&flipped, &reference);
        assert_relative_eq!(u, u_neg_ref, epsilon = 1e-12);
        assert_relative_eq!(u, u_neg_state, epsilon = 1e-12);
    }

    #[test]
    fn attitude_large_error_takes_short_way() {
        let ctl = attitude_controller();
        let state = State::default();
        // 170 degrees about z reached by the long way is still a positive yaw command
        let yaw = 170.0_f64.to_radians();
        let reference = UnitQuaternion::from_euler(&Vector3::new(0.0, 0.0, yaw));
        assert!(ctl.run(&state, &reference).z > 0.0);
        let reference = UnitQuaternion::from_euler(&Vector3::new(0.0, 0.0, -yaw));
        assert!(ctl.run(&state, &reference).z < 0.0);
        let reference = negate(&reference);
        assert!(ctl.run(&state, &reference).z < 0.0);
    }

    #[test]
    fn attitude_command_scales_and_cancels_coupling() {
        let p = params();
        let ctl = attitude_controller();
        let state = State::default();
        let angle = 0.1_f64;
        let reference = UnitQuaternion::from_euler(&Vector3::new(angle, 0.0, 0.0));
        let u = ctl.run(&state, &reference);
        assert_relative_eq!(
            u.x,
            p.inertia.x / p.arm_length * 400.0 * (angle / 2.0).sin(),
            epsilon = 1e-12
        );
        assert_relative_eq!(u.y, 0.0, epsilon = 1e-12);
        // pure rate with matching reference rate leaves only the gyroscopic term
        let mut spinning = State::default();
        spinning.angular_velocity = Vector3::new(0.0, 2.0, 3.0);
        let u = ctl.run_with_rate(
            &spinning,
            &UnitQuaternion::identity(),
            &spinning.angular_velocity,
        );
        let j = p.inertia;
        assert_relative_eq!(u.x, (j.z - j.y) * 6.0 / p.arm_length, epsilon = 1e-12);
        assert_relative_eq!(u.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(u.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn attitude_reference_integrates_rate() {
        let mut reference = AttitudeReference::default();
        let rate = Vector3::new(PI / 4.0, 0.0, 0.0);
        for _ in 0..200 {
            reference.run(&rate, 0.01);
        }
        assert_relative_eq!(reference.orientation().to_euler().x, PI / 2.0, epsilon = 1e-9);
        assert_relative_eq!(reference.orientation().norm(), 1.0, epsilon = 1e-12);
        assert_eq!(reference.rate(), &rate);
        reference.reset(UnitQuaternion::identity());
        assert_eq!(reference.rate(), &Vector3::zeros());
    }

    #[test]
    fn allocation_round_trip() {
        for frame in [FrameGeometry::X, FrameGeometry::Plus] {
            let allocator = ControlAllocator::from_geometry(frame).unwrap();
            assert_relative_eq!(
                allocator.matrix() * allocator.inverse_matrix(),
                Matrix4::identity(),
                epsilon = 1e-12
            );
            let u = Vector4::new(4.9, -0.3, 0.7, 0.05);
            assert_relative_eq!(
                allocator.allocate_vector(&allocator.deallocate(&u)),
                u,
                epsilon = 1e-12
            );
            assert_relative_eq!(
                allocator.deallocate(&allocator.allocate(u[0], &u.fixed_rows::<3>(1).into_owned())),
                u,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn singular_allocation_is_rejected() {
        let mut matrix = ControlAllocator::geometry_matrix(FrameGeometry::X);
        let pitch_column = matrix.column(2).into_owned();
        matrix.set_column(3, &pitch_column);
        assert!(matches!(
            ControlAllocator::new(matrix),
            Err(ControlError::SingularAllocation)
        ));
    }

    #[test]
    fn composed_controller_hovers_evenly() {
        let config = Config::default();
        let ctl = AttitudeAltitudeController::from_config(&config).unwrap();
        let u = ctl.run(&State::default(), &Reference::default());
        let each = config.vehicle.mass * config.vehicle.gravity / 4.0;
        assert_relative_eq!(u, Vector4::repeat(each), epsilon = 1e-12);
    }

    #[test]
    fn composed_controller_matches_its_parts() {
        let ctl = AttitudeAltitudeController::from_config(&Config::default()).unwrap();
        let state = tilted_state();
        let attitude = UnitQuaternion::from_euler(&Vector3::new(0.05, 0.1, 1.0));
        let reference = Reference::new(-2.0, attitude);
        let uz = ctl.altitude.run(&state, reference.altitude);
        let upqr = ctl.attitude.run(&state, &reference.attitude);
        let motors = ctl.run(&state, &reference);
        assert_relative_eq!(motors, ctl.allocator.allocate(uz, &upqr), epsilon = 1e-12);
        assert_relative_eq!(
            ctl.allocator.deallocate(&motors),
            ctl.axis_commands(&state, &reference),
            epsilon = 1e-12
        );
    }

    #[test]
    fn invalid_gains_are_rejected_before_any_command() {
        let mut config = Config::default();
        config.attitude.natural_frequency[0] = f64::NAN;
        assert!(matches!(
            AttitudeAltitudeController::from_config(&config),
            Err(ControlError::InvalidParameters(_))
        ));
        let mut config = Config::default();
        config.attitude.damping_ratio = [-0.7; 3];
        assert!(matches!(
            AttitudeAltitudeController::from_config(&config),
            Err(ControlError::InvalidParameters(_))
        ));
        let mut config = Config::default();
        config.altitude.command_gain = f64::INFINITY;
        assert!(matches!(
            AttitudeAltitudeController::from_config(&config),
            Err(ControlError::InvalidParameters(_))
        ));
    }

    #[test]
    fn custom_matrix_overrides_frame() {
        let mut config = Config::default();
        config.allocation.matrix = Some([[1.0, 0.0, 0.0, 0.0]; 4]);
        assert!(matches!(
            AttitudeAltitudeController::from_config(&config),
            Err(ControlError::SingularAllocation)
        ));
    }
}
