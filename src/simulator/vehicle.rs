//! Vehicle state and F1/10-scale planar dynamics.
//!
//! The model is the kinematic bicycle in body-frame velocities:
//!
//! ```text
//! ẋ = vx·cos θ − vy·sin θ
//! ẏ = vx·sin θ + vy·cos θ
//! θ̇ = ω
//! ```
//!
//! Commanded speed and yaw rate are tracked through first-order actuator lags,
//! and the lateral velocity `vy` follows a speed-dependent slip approximation.
//! With slip disabled `vy` stays zero and the equations reduce to the plain
//! kinematic model. All randomness lives in the sensors; a step here is a pure
//! function of its inputs.

use crate::common::config::{DynamicsConfig, SuspensionConfig};
use crate::common::errors::{StateError, StateResult};
use crate::common::filters::FirstOrderLag;
use crate::simulator::drive_helpers::{clip_symmetric, lateral_slip_target, rate_limit, wrap_angle};

/// Standard gravity in m/s².
pub const GRAVITY: f64 = 9.80665;

/// Pitch/roll state carried in 3D mode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyAttitude {
    /// Roll angle in radians, positive toward the outside of a left turn.
    pub roll: f64,
    /// Pitch angle in radians, positive nose-up.
    pub pitch: f64,
    /// Roll rate in rad/s.
    pub roll_rate: f64,
    /// Pitch rate in rad/s.
    pub pitch_rate: f64,
    /// Fraction of the load moved across the axle, in `[-1, 1]`.
    pub lateral_load_transfer: f64,
    /// Fraction of the load moved between the axles, in `[-1, 1]`.
    pub longitudinal_load_transfer: f64,
}

/// True physical state of the vehicle at a simulation instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    /// Position in meters.
    pub x: f64,
    pub y: f64,
    /// Heading in radians, kept in `[-π, π)`.
    pub theta: f64,
    /// Longitudinal body velocity in m/s.
    pub vx: f64,
    /// Lateral body velocity in m/s.
    pub vy: f64,
    /// Yaw rate in rad/s.
    pub omega: f64,
    /// Body-frame acceleration over the last step, as an accelerometer sees it.
    pub accel_x: f64,
    pub accel_y: f64,
    /// Present only when 3D dynamics are enabled.
    pub attitude: Option<BodyAttitude>,
}

impl VehicleState {
    /// A vehicle standing still at the given pose.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::simulator::vehicle::VehicleState;
    ///
    /// let state = VehicleState::at_rest(1.0, 2.0, 0.5);
    /// assert_eq!(state.position(), [1.0, 2.0]);
    /// assert_eq!(state.speed(), 0.0);
    /// ```
    pub fn at_rest(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
            ..Self::default()
        }
    }

    pub fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    /// Magnitude of the body velocity.
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    /// `[x, y, θ, vx, vy, ω]`, the layout the estimator uses.
    pub fn as_vector(&self) -> [f64; 6] {
        [self.x, self.y, self.theta, self.vx, self.vy, self.omega]
    }

    pub fn is_finite(&self) -> bool {
        self.validate().is_ok()
    }

    /// Reports the first non-finite field, which the caller treats as a
    /// terminal condition.
    pub fn validate(&self) -> StateResult<()> {
        let mut fields = vec![
            ("x", self.x),
            ("y", self.y),
            ("theta", self.theta),
            ("vx", self.vx),
            ("vy", self.vy),
            ("omega", self.omega),
            ("accel_x", self.accel_x),
            ("accel_y", self.accel_y),
        ];
        if let Some(att) = &self.attitude {
            fields.extend([
                ("roll", att.roll),
                ("pitch", att.pitch),
                ("roll_rate", att.roll_rate),
                ("pitch_rate", att.pitch_rate),
            ]);
        }
        match fields.into_iter().find(|(_, v)| !v.is_finite()) {
            Some((field, _)) => Err(StateError::NonFinite { field }),
            None => Ok(()),
        }
    }
}

/// Speed and yaw-rate command in physical units, fixed for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlCommand {
    /// Commanded longitudinal speed in m/s.
    pub velocity: f64,
    /// Commanded yaw rate in rad/s.
    pub angular_velocity: f64,
}

impl ControlCommand {
    pub fn physical(velocity: f64, angular_velocity: f64) -> Self {
        Self {
            velocity,
            angular_velocity,
        }
    }

    /// Scales a command given in `[-1, 1]` to the vehicle's physical range.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::DynamicsConfig;
    /// use drift_gym::simulator::vehicle::ControlCommand;
    ///
    /// let cmd = ControlCommand::from_normalized(0.5, -2.0, &DynamicsConfig::default());
    /// assert_eq!(cmd.velocity, 2.0);
    /// assert_eq!(cmd.angular_velocity, -3.0);
    /// ```
    pub fn from_normalized(velocity: f64, angular_velocity: f64, config: &DynamicsConfig) -> Self {
        Self {
            velocity: velocity.clamp(-1.0, 1.0) * config.max_speed,
            angular_velocity: angular_velocity.clamp(-1.0, 1.0) * config.max_yaw_rate,
        }
    }

    /// Clips the command to the configured physical bounds.
    pub fn saturated(&self, config: &DynamicsConfig) -> Self {
        Self {
            velocity: clip_symmetric(self.velocity, config.max_speed),
            angular_velocity: clip_symmetric(self.angular_velocity, config.max_yaw_rate),
        }
    }
}

/// Vehicle footprint, used for collision checks only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleGeometry {
    pub wheelbase: f64,
    pub width: f64,
}

impl VehicleGeometry {
    pub fn from_config(config: &DynamicsConfig) -> Self {
        Self {
            wheelbase: config.wheelbase,
            width: config.width,
        }
    }

    /// Radius of the circle enclosing the wheelbase-by-width rectangle.
    pub fn bounding_radius(&self) -> f64 {
        0.5 * self.wheelbase.hypot(self.width)
    }
}

/// Result of advancing the pose by one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseStep {
    /// `[x, y, θ]` after the step, θ wrapped.
    pub pose: [f64; 3],
    /// Heading change actually applied.
    pub heading_step: f64,
    /// True when the heading change hit `max_heading_step`.
    pub capped: bool,
}

/// Advances `[x, y, θ]` by `dt` with body velocities `[vx, vy, ω]`.
///
/// Shared by the true dynamics and the estimator's process model so both
/// integrate the same equations.
///
/// # Examples
///
/// ```rust
/// use drift_gym::common::config::DynamicsConfig;
/// use drift_gym::simulator::vehicle::advance_pose;
///
/// let step = advance_pose([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 0.5, &DynamicsConfig::default());
/// assert_eq!(step.pose, [0.5, 0.0, 0.0]);
/// ```
pub fn advance_pose(pose: [f64; 3], velocity: [f64; 3], dt: f64, config: &DynamicsConfig) -> PoseStep {
    let [x, y, theta] = pose;
    let [vx, vy, omega] = velocity;

    let raw_step = omega * dt;
    let heading_step = rate_limit(raw_step, 0.0, -config.max_heading_step, config.max_heading_step);
    let capped = raw_step.abs() > config.max_heading_step;

    let heading = theta + config.integrator.heading_fraction() * heading_step;
    let (sin_h, cos_h) = heading.sin_cos();

    PoseStep {
        pose: [
            x + (vx * cos_h - vy * sin_h) * dt,
            y + (vx * sin_h + vy * cos_h) * dt,
            wrap_angle(theta + heading_step),
        ],
        heading_step,
        capped,
    }
}

/// Integrates the true vehicle state.
#[derive(Debug, Clone)]
pub struct VehicleDynamics {
    config: DynamicsConfig,
    use_3d: bool,
}

impl VehicleDynamics {
    /// Creates a new `VehicleDynamics` instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Vehicle limits, actuator lags and slip table.
    /// * `use_3d` - Whether to integrate the pitch/roll extension.
    pub fn new(config: DynamicsConfig, use_3d: bool) -> Self {
        Self { config, use_3d }
    }

    pub fn config(&self) -> &DynamicsConfig {
        &self.config
    }

    /// Footprint used for collision checks.
    pub fn geometry(&self) -> VehicleGeometry {
        VehicleGeometry::from_config(&self.config)
    }

    /// Advances `state` by one fixed timestep under `command`.
    ///
    /// Never fails: a pathological command can produce a non-finite state,
    /// which [`VehicleState::validate`] reports to the caller.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::DynamicsConfig;
    /// use drift_gym::simulator::vehicle::{ControlCommand, VehicleDynamics, VehicleState};
    ///
    /// let dynamics = VehicleDynamics::new(DynamicsConfig::default(), false);
    /// let mut state = VehicleState::at_rest(0.0, 0.0, 0.0);
    /// for _ in 0..50 {
    ///     state = dynamics.step(&state, &ControlCommand::physical(2.0, 0.0), 0.02);
    /// }
    /// assert!(state.x > 1.0 && state.vx > 1.9);
    /// assert_eq!(state.y, 0.0);
    /// ```
    pub fn step(&self, state: &VehicleState, command: &ControlCommand, dt: f64) -> VehicleState {
        let cfg = &self.config;
        let command = command.saturated(cfg);

        let vx = clip_symmetric(
            FirstOrderLag::new(cfg.velocity_time_constant, dt).apply(state.vx, command.velocity),
            cfg.max_speed,
        );
        let omega = clip_symmetric(
            FirstOrderLag::new(cfg.yaw_rate_time_constant, dt).apply(state.omega, command.angular_velocity),
            cfg.max_yaw_rate,
        );
        let vy = if cfg.slip.enabled {
            let target = lateral_slip_target(vx, omega, &cfg.slip);
            clip_symmetric(
                FirstOrderLag::new(cfg.slip.relaxation_time, dt).apply(state.vy, target),
                cfg.slip.max_lateral_speed,
            )
        } else {
            0.0
        };

        let step = advance_pose([state.x, state.y, state.theta], [vx, vy, omega], dt, cfg);
        let [x, y, theta] = step.pose;

        let accel_x = (vx - state.vx) / dt - vy * omega;
        let accel_y = (vy - state.vy) / dt + vx * omega;

        let attitude = if self.use_3d {
            Some(self.advance_attitude(state.attitude.unwrap_or_default(), accel_x, accel_y, dt))
        } else {
            None
        };

        VehicleState {
            x,
            y,
            theta,
            vx,
            vy,
            omega,
            accel_x,
            accel_y,
            attitude,
        }
    }

    /// Damped second-order pitch/roll response toward the angles implied by
    /// the current load transfer.
    fn advance_attitude(&self, prev: BodyAttitude, accel_x: f64, accel_y: f64, dt: f64) -> BodyAttitude {
        let SuspensionConfig {
            cg_height,
            max_roll,
            max_pitch,
            natural_frequency: wn,
            damping_ratio: zeta,
        } = self.config.suspension;

        let lateral = clip_symmetric(accel_y * cg_height / (GRAVITY * 0.5 * self.config.width), 1.0);
        let longitudinal =
            clip_symmetric(accel_x * cg_height / (GRAVITY * 0.5 * self.config.wheelbase), 1.0);

        let settle = |angle: f64, rate: f64, target: f64| {
            let accel = wn * wn * (target - angle) - 2.0 * zeta * wn * rate;
            let rate = rate + accel * dt;
            (angle + rate * dt, rate)
        };
        let (roll, roll_rate) = settle(prev.roll, prev.roll_rate, max_roll * lateral);
        let (pitch, pitch_rate) = settle(prev.pitch, prev.pitch_rate, max_pitch * longitudinal);

        BodyAttitude {
            roll,
            pitch,
            roll_rate,
            pitch_rate,
            lateral_load_transfer: lateral,
            longitudinal_load_transfer: longitudinal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Integrator;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn ideal_config(integrator: Integrator) -> DynamicsConfig {
        let mut config = DynamicsConfig {
            velocity_time_constant: 0.0,
            yaw_rate_time_constant: 0.0,
            integrator,
            ..DynamicsConfig::default()
        };
        config.slip.enabled = false;
        config
    }

    fn run(dynamics: &VehicleDynamics, command: ControlCommand, dt: f64, steps: usize) -> VehicleState {
        let mut state = VehicleState::at_rest(0.0, 0.0, 0.0);
        for _ in 0..steps {
            state = dynamics.step(&state, &command, dt);
        }
        state
    }

    #[test]
    fn test_straight_line_one_second() {
        let dynamics = VehicleDynamics::new(ideal_config(Integrator::Midpoint), false);
        let state = run(&dynamics, ControlCommand::physical(1.0, 0.0), 0.02, 50);

        assert_abs_diff_eq!(state.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.theta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_turn_in_place_quarter() {
        // π/2 seconds at 1 rad/s, no forward speed: heading π/2, no displacement.
        let dt = FRAC_PI_2 / 80.0;
        let dynamics = VehicleDynamics::new(ideal_config(Integrator::Euler), false);
        let state = run(&dynamics, ControlCommand::physical(0.0, 1.0), dt, 80);

        assert_abs_diff_eq!(state.theta, FRAC_PI_2, epsilon = 1e-9);
        assert_abs_diff_eq!(state.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quarter_arc_matches_closed_form() {
        // v = 1, ω = 1 for π/2 s traces a quarter circle of radius 1 ending at (1, 1).
        let dt = FRAC_PI_2 / 100.0;
        let command = ControlCommand::physical(1.0, 1.0);

        let midpoint = run(&VehicleDynamics::new(ideal_config(Integrator::Midpoint), false), command, dt, 100);
        assert_abs_diff_eq!(midpoint.x, 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(midpoint.y, 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(midpoint.theta, FRAC_PI_2, epsilon = 1e-9);

        // Semi-implicit Euler leads the arc by half a step: first-order error.
        let euler = run(&VehicleDynamics::new(ideal_config(Integrator::Euler), false), command, dt, 100);
        assert_abs_diff_eq!(euler.x, 1.0, epsilon = 2.0 * dt);
        assert_abs_diff_eq!(euler.y, 1.0, epsilon = 2.0 * dt);
        assert!((midpoint.x - 1.0).abs() < (euler.x - 1.0).abs());
    }

    #[test]
    fn test_actuator_lag_is_not_instantaneous() {
        let dynamics = VehicleDynamics::new(DynamicsConfig::default(), false);
        let state = dynamics.step(&VehicleState::default(), &ControlCommand::physical(2.0, 1.0), 0.02);

        assert!(state.vx > 0.0 && state.vx < 2.0);
        assert!(state.omega > 0.0 && state.omega < 1.0);
        assert_abs_diff_eq!(state.accel_x, state.vx / 0.02 - state.vy * state.omega, epsilon = 1e-12);
    }

    #[test]
    fn test_command_saturation() {
        let dynamics = VehicleDynamics::new(ideal_config(Integrator::Midpoint), false);
        let state = dynamics.step(&VehicleState::default(), &ControlCommand::physical(25.0, -9.0), 0.02);

        assert_eq!(state.vx, 4.0);
        assert_eq!(state.omega, -3.0);
    }

    #[test]
    fn test_heading_step_is_capped() {
        let config = DynamicsConfig {
            max_heading_step: 0.1,
            ..ideal_config(Integrator::Euler)
        };
        let dynamics = VehicleDynamics::new(config, false);
        let state = dynamics.step(&VehicleState::default(), &ControlCommand::physical(0.0, 3.0), 0.5);

        assert_abs_diff_eq!(state.theta, 0.1, epsilon = 1e-12);
        assert_eq!(state.omega, 3.0);
    }

    #[test]
    fn test_heading_wraps() {
        let dynamics = VehicleDynamics::new(ideal_config(Integrator::Euler), false);
        let start = VehicleState::at_rest(0.0, 0.0, PI - 0.01);
        let state = dynamics.step(&start, &ControlCommand::physical(0.0, 1.0), 0.02);

        assert_abs_diff_eq!(state.theta, -PI + 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_slip_builds_lateral_velocity_when_drifting() {
        let dynamics = VehicleDynamics::new(DynamicsConfig::default(), false);
        let state = run(&dynamics, ControlCommand::physical(4.0, 2.0), 0.02, 100);

        assert!(state.vy < -0.1, "expected outward slide, got vy = {}", state.vy);
        assert!(state.vy >= -2.0);

        let slow = run(&dynamics, ControlCommand::physical(1.0, 2.0), 0.02, 100);
        assert_abs_diff_eq!(slow.vy, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_command_surfaces() {
        let dynamics = VehicleDynamics::new(DynamicsConfig::default(), false);
        let state = dynamics.step(&VehicleState::default(), &ControlCommand::physical(f64::NAN, 0.0), 0.02);

        assert!(!state.is_finite());
        assert_eq!(state.validate(), Err(StateError::NonFinite { field: "x" }));
    }

    #[test]
    fn test_3d_mode_is_additive() {
        let command = ControlCommand::physical(3.5, 2.5);
        let flat = VehicleDynamics::new(DynamicsConfig::default(), false);
        let full = VehicleDynamics::new(DynamicsConfig::default(), true);

        let mut a = VehicleState::default();
        let mut b = VehicleState::default();
        for _ in 0..100 {
            a = flat.step(&a, &command, 0.02);
            b = full.step(&b, &command, 0.02);
        }

        assert_eq!(a.as_vector(), b.as_vector());
        assert!(a.attitude.is_none());
        let attitude = b.attitude.unwrap();
        // Sustained left turn: body rolls toward the outside.
        assert!(attitude.roll > 0.0);
        assert!(attitude.lateral_load_transfer > 0.0 && attitude.lateral_load_transfer <= 1.0);
        assert!(attitude.roll <= DynamicsConfig::default().suspension.max_roll * 1.2);
    }

    #[test]
    fn test_bounding_radius() {
        let geometry = VehicleDynamics::new(DynamicsConfig::default(), false).geometry();
        assert_eq!(geometry, VehicleGeometry::from_config(&DynamicsConfig::default()));
        assert_abs_diff_eq!(geometry.bounding_radius(), 0.5 * (0.324_f64.powi(2) + 0.48_f64.powi(2)).sqrt(), epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn prop_state_stays_within_limits(
            commands in prop::collection::vec((-10.0f64..10.0, -10.0f64..10.0), 1..200),
            dt in 0.005f64..0.1,
        ) {
            let config = DynamicsConfig::default();
            let dynamics = VehicleDynamics::new(config.clone(), true);
            let mut state = VehicleState::default();
            for (v, w) in commands {
                state = dynamics.step(&state, &ControlCommand::physical(v, w), dt);
                prop_assert!(state.is_finite());
                prop_assert!(state.theta >= -PI && state.theta < PI);
                prop_assert!(state.vx.abs() <= config.max_speed);
                prop_assert!(state.omega.abs() <= config.max_yaw_rate);
                prop_assert!(state.vy.abs() <= config.slip.max_lateral_speed);
            }
        }

        #[test]
        fn prop_step_is_deterministic(v in -5.0f64..5.0, w in -5.0f64..5.0) {
            let dynamics = VehicleDynamics::new(DynamicsConfig::default(), false);
            let start = VehicleState { vx: 1.0, omega: 0.3, ..VehicleState::at_rest(0.5, -0.2, 1.0) };
            let command = ControlCommand::physical(v, w);
            prop_assert_eq!(dynamics.step(&start, &command, 0.02), dynamics.step(&start, &command, 0.02));
        }
    }
}
