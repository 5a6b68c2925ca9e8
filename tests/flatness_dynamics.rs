//! Checks the control laws against an independent rigid-body model of the vehicle.
use approx::assert_relative_eq;
use multirotor_control::config::Config;
use multirotor_control::{
    AttitudeAltitudeController, DifferentialFlatness, FlatOutput, QuaternionAlgebra, Reference,
    State, VehicleParameters,
};
use nalgebra::{UnitQuaternion, Vector3, Vector4};
use std::f64::consts::FRAC_PI_2;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params() -> VehicleParameters {
    Config::default().vehicle.parameters().unwrap()
}

/// `k`-th derivative of `offset + amplitude * sin(omega t + phase)`
fn sine_derivative(t: f64, offset: f64, amplitude: f64, omega: f64, phase: f64, k: usize) -> f64 {
    let value =
        amplitude * omega.powi(k as i32) * (omega * t + phase + k as f64 * FRAC_PI_2).sin();
    if k == 0 {
        offset + value
    } else {
        value
    }
}

/// Circle in the horizontal plane with a vertical wobble and a turning, oscillating heading
fn circle_sample(t: f64) -> FlatOutput {
    let mut rows = [[0.0; 5]; 4];
    for k in 0..5 {
        rows[0][k] = sine_derivative(t, 0.0, 2.0, 0.8, FRAC_PI_2, k);
        rows[1][k] = sine_derivative(t, 0.0, 2.0, 0.8, 0.0, k);
        rows[2][k] = sine_derivative(t, -3.0, 0.5, 1.3, 0.0, k);
        rows[3][k] = sine_derivative(t, 0.0, 0.2, 0.7, 0.0, k);
    }
    // linear heading drift on top
    rows[3][0] += 0.3 + 0.5 * t;
    rows[3][1] += 0.5;
    FlatOutput::from_rows(rows)
}

/// Translational acceleration of the NED rigid-body model
fn translational_acceleration(
    p: &VehicleParameters,
    orientation: &UnitQuaternion<f64>,
    velocity: &Vector3<f64>,
    thrust: f64,
) -> Vector3<f64> {
    p.gravity * Vector3::z() - thrust / p.mass * (orientation * Vector3::z())
        - velocity * p.drag_over_mass()
}

/// Body torques from the axis commands `[Up, Uq, Ur]`
fn body_torque(p: &VehicleParameters, axis: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(
        p.arm_length * axis.x,
        p.arm_length * axis.y,
        p.torque_coefficient * axis.z,
    )
}

fn angular_acceleration(
    p: &VehicleParameters,
    rate: &Vector3<f64>,
    torque: &Vector3<f64>,
) -> Vector3<f64> {
    let momentum = p.inertia.component_mul(rate);
    (torque - rate.cross(&momentum)).component_div(&p.inertia)
}

#[test]
fn circle_inversion_satisfies_equations_of_motion() {
    init_logger();
    let p = params();
    let inverter = DifferentialFlatness::new(&p);
    for &t in &[0.0, 0.37, 1.5, 4.2, 7.9] {
        let flat = circle_sample(t);
        let out = inverter.invert(&flat).unwrap();
        assert_eq!(out.state.position, flat.position(0));
        assert_eq!(out.state.velocity, flat.position(1));
        let accel = translational_acceleration(
            &p,
            &out.state.orientation,
            &out.state.velocity,
            out.wrench.thrust,
        );
        assert_relative_eq!(accel, flat.position(2), epsilon = 1e-9);
        let torque = body_torque(&p, &out.wrench.torque);
        assert_relative_eq!(
            angular_acceleration(&p, &out.state.angular_velocity, &torque),
            out.angular_acceleration,
            epsilon = 1e-9
        );
        let yaw = out.state.orientation.to_euler().z;
        assert_relative_eq!(yaw.sin(), flat.yaw(0).sin(), epsilon = 1e-9);
        assert_relative_eq!(yaw.cos(), flat.yaw(0).cos(), epsilon = 1e-9);
    }
}

#[test]
fn circle_rates_match_finite_differences() {
    let p = params();
    let inverter = DifferentialFlatness::new(&p);
    let h = 1e-4;
    for &t in &[0.2, 2.0, 5.5] {
        let before = inverter.invert(&circle_sample(t - h)).unwrap();
        let now = inverter.invert(&circle_sample(t)).unwrap();
        let after = inverter.invert(&circle_sample(t + h)).unwrap();
        let delta = before
            .state
            .orientation
            .inverse_compose(&after.state.orientation);
        let rate_from_attitude = delta.imag() * (2.0 / (2.0 * h));
        assert_relative_eq!(rate_from_attitude, now.state.angular_velocity, epsilon = 1e-6);
        let acceleration_from_rates =
            (after.state.angular_velocity - before.state.angular_velocity) / (2.0 * h);
        assert_relative_eq!(acceleration_from_rates, now.angular_acceleration, epsilon = 1e-6);
    }
}

/// Explicit Euler step of the rigid body under rotor forces
fn step(
    p: &VehicleParameters,
    ctl: &AttitudeAltitudeController,
    state: &mut State,
    motors: &Vector4<f64>,
    dt: f64,
) {
    let axis = ctl.allocator.deallocate(motors);
    let torque = body_torque(p, &Vector3::new(axis[1], axis[2], axis[3]));
    let accel = translational_acceleration(p, &state.orientation, &state.velocity, axis[0]);
    let rate_dot = angular_acceleration(p, &state.angular_velocity, &torque);
    state.position += state.velocity * dt;
    state.velocity += accel * dt;
    state.orientation = state.orientation.integrate(&state.angular_velocity, dt);
    state.angular_velocity += rate_dot * dt;
}

#[test]
fn composed_controller_converges_to_reference() {
    init_logger();
    let p = params();
    let ctl = AttitudeAltitudeController::from_config(&Config::default()).unwrap();
    let reference = Reference::new(
        -1.0,
        UnitQuaternion::from_euler(&Vector3::new(0.0, 0.0, 0.5)),
    );
    let mut state = State {
        orientation: UnitQuaternion::from_euler(&Vector3::new(0.1, -0.05, -0.3)),
        angular_velocity: Vector3::new(0.2, -0.1, 0.3),
        ..State::default()
    };
    let dt = 1e-3;
    for _ in 0..8000 {
        let motors = ctl.run(&state, &reference);
        step(&p, &ctl, &mut state, &motors, dt);
    }
    assert_relative_eq!(state.position.z, reference.altitude, epsilon = 1e-3);
    assert_relative_eq!(state.velocity.z, 0.0, epsilon = 1e-3);
    assert!(state.orientation.angle_to(&reference.attitude) < 1e-4);
    assert_relative_eq!(state.angular_velocity, Vector3::zeros(), epsilon = 1e-4);
}
