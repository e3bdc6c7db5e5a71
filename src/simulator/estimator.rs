//! Six-state extended Kalman filter fusing GPS, gyro and wheel-odometry
//! measurements.
//!
//! The state is `[x, y, θ, vx, vy, ω]`. The process model reuses the
//! vehicle's actuator lags, heading cap and integrator but has no slip
//! build-up: the lateral velocity only decays. That mismatch against the true
//! dynamics is covered by Q.

use crate::common::config::{DynamicsConfig, SimConfig, STATE_DIM};
use crate::common::ext_kal_fltr::{kalman_update, propagate_covariance, SensorReading, SimpleSensor, EKF};
use crate::common::filters::FirstOrderLag;
use crate::simulator::drive_helpers::{clip_symmetric, wrap_angle};
use crate::simulator::sensors::Measurement;
use crate::simulator::vehicle::{advance_pose, ControlCommand};
use log::{trace, warn};
use ndarray::{arr1, Array1, Array2};

pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_THETA: usize = 2;
pub const IDX_VX: usize = 3;
pub const IDX_VY: usize = 4;
pub const IDX_OMEGA: usize = 5;

/// Below this speed the speed uncertainty falls back to the vx variance.
const MIN_SPEED_FOR_LINEARIZATION: f64 = 1e-6;

/// Filter mean and covariance at a point in simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorState {
    /// `[x, y, θ, vx, vy, ω]`
    pub mean: Array1<f64>,
    /// 6x6, symmetric positive semi-definite.
    pub covar: Array2<f64>,
    /// Simulated time of the estimate, seconds.
    pub time: f64,
    /// Corrections that needed a regularized inverse.
    pub regularized_updates: u32,
    /// Corrections dropped because no regularization helped.
    pub skipped_updates: u32,
}

/// Read-only view of an estimate for the decision layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
    pub speed: f64,
    /// Std of `speed`, linearized from the velocity block of P.
    pub speed_std: f64,
    pub yaw_rate_std: f64,
    /// `sqrt(σx² + σy²)`
    pub position_std: f64,
}

impl EstimatorState {
    /// Square roots of the covariance diagonal.
    pub fn std_devs(&self) -> Array1<f64> {
        self.covar.diag().mapv(|v| v.max(0.0).sqrt())
    }

    /// `σx² + σy²`
    pub fn position_variance(&self) -> f64 {
        self.covar[[IDX_X, IDX_X]] + self.covar[[IDX_Y, IDX_Y]]
    }

    /// Summarizes the estimate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::SimConfig;
    /// use drift_gym::simulator::estimator::StateEstimator;
    ///
    /// let estimator = StateEstimator::new(&SimConfig::default());
    /// let summary = estimator.initial_state([1.0, 2.0, 0.0], 0.0).summary();
    /// assert_eq!((summary.x, summary.y), (1.0, 2.0));
    /// assert_eq!(summary.speed, 0.0);
    /// assert!((summary.position_std - 2f64.sqrt()).abs() < 1e-12);
    /// ```
    pub fn summary(&self) -> Estimate {
        let m = &self.mean;
        let p = &self.covar;
        let (vx, vy) = (m[IDX_VX], m[IDX_VY]);
        let speed = vx.hypot(vy);

        let speed_var = if speed > MIN_SPEED_FOR_LINEARIZATION {
            let (jx, jy) = (vx / speed, vy / speed);
            jx * jx * p[[IDX_VX, IDX_VX]] + 2.0 * jx * jy * p[[IDX_VX, IDX_VY]] + jy * jy * p[[IDX_VY, IDX_VY]]
        } else {
            p[[IDX_VX, IDX_VX]]
        };

        Estimate {
            x: m[IDX_X],
            y: m[IDX_Y],
            theta: m[IDX_THETA],
            vx,
            vy,
            omega: m[IDX_OMEGA],
            speed,
            speed_std: speed_var.max(0.0).sqrt(),
            yaw_rate_std: p[[IDX_OMEGA, IDX_OMEGA]].max(0.0).sqrt(),
            position_std: self.position_variance().max(0.0).sqrt(),
        }
    }
}

/// The filter's models and tuning. Holds no estimate; see [`EstimatorState`].
#[derive(Debug, Clone)]
pub struct StateEstimator {
    dynamics: DynamicsConfig,
    process_noise: Array2<f64>,
    initial_covariance: Array2<f64>,
    gps: SimpleSensor,
    gyro: SimpleSensor,
    odometry: SimpleSensor,
    regularization_epsilon: f64,
    max_regularization_attempts: u32,
}

impl StateEstimator {
    /// Builds the filter from a validated configuration.
    pub fn new(config: &SimConfig) -> Self {
        let gps_var = config.gps.noise_std.powi(2);
        let gyro_var = config.imu.gyro_noise_std.powi(2) + config.imu.gyro_bias_std.powi(2);
        Self {
            dynamics: config.dynamics.clone(),
            process_noise: config.estimator.process_noise_matrix(),
            initial_covariance: config.estimator.initial_covariance.to_matrix(),
            gps: SimpleSensor::new(&[IDX_X, IDX_Y], STATE_DIM, &[gps_var, gps_var]),
            gyro: SimpleSensor::new(&[IDX_OMEGA], STATE_DIM, &[gyro_var]),
            odometry: SimpleSensor::new(&[IDX_VX], STATE_DIM, &[config.velocity.noise_std.powi(2)]),
            regularization_epsilon: config.estimator.regularization_epsilon,
            max_regularization_attempts: config.estimator.max_regularization_attempts,
        }
    }

    /// Reset state: the given pose at rest, covariance P₀.
    pub fn initial_state(&self, pose: [f64; 3], time: f64) -> EstimatorState {
        EstimatorState {
            mean: arr1(&[pose[0], pose[1], wrap_angle(pose[2]), 0.0, 0.0, 0.0]),
            covar: self.initial_covariance.clone(),
            time,
            regularized_updates: 0,
            skipped_updates: 0,
        }
    }

    /// Turns a measurement into a filter reading. `None` for a dropped GPS fix.
    pub fn reading(&self, measurement: &Measurement) -> Option<SensorReading> {
        match measurement {
            Measurement::Gps(gps) => gps.position.map(|p| self.gps.read(arr1(&p))),
            Measurement::Imu(imu) => Some(self.gyro.read(arr1(&[imu.yaw_rate]))),
            Measurement::Velocity(odo) => Some(self.odometry.read(arr1(&[odo.speed]))),
        }
    }

    fn lags(&self, dt: f64) -> (FirstOrderLag, FirstOrderLag, FirstOrderLag) {
        let cfg = &self.dynamics;
        let relaxation = if cfg.slip.enabled {
            cfg.slip.relaxation_time
        } else {
            0.0
        };
        (
            FirstOrderLag::new(cfg.velocity_time_constant, dt),
            FirstOrderLag::new(relaxation, dt),
            FirstOrderLag::new(cfg.yaw_rate_time_constant, dt),
        )
    }
}

/// Applies `lag` and the symmetric limit, returning the value and its
/// derivative with respect to the previous value.
fn lag_and_clip(lag: &FirstOrderLag, current: f64, target: f64, limit: f64) -> (f64, f64) {
    let raw = lag.apply(current, target);
    let sensitivity = if raw.abs() > limit {
        0.0
    } else {
        lag.state_sensitivity()
    };
    (clip_symmetric(raw, limit), sensitivity)
}

impl EKF for StateEstimator {
    type State = EstimatorState;
    type Control = ControlCommand;
    type Measurement = Measurement;

    fn calc_transfer_fun(&self, state: &EstimatorState, control: &ControlCommand, dt: f64) -> (Array1<f64>, Array2<f64>) {
        let cfg = &self.dynamics;
        let command = control.saturated(cfg);
        let m = &state.mean;
        let (lag_v, lag_s, lag_w) = self.lags(dt);

        let (vx, dvx) = lag_and_clip(&lag_v, m[IDX_VX], command.velocity, cfg.max_speed);
        let (vy, dvy) = lag_and_clip(&lag_s, m[IDX_VY], 0.0, cfg.slip.max_lateral_speed);
        let (omega, domega) = lag_and_clip(&lag_w, m[IDX_OMEGA], command.angular_velocity, cfg.max_yaw_rate);

        let theta = m[IDX_THETA];
        let step = advance_pose([m[IDX_X], m[IDX_Y], theta], [vx, vy, omega], dt, cfg);
        let mean = arr1(&[step.pose[0], step.pose[1], step.pose[2], vx, vy, omega]);

        let h = cfg.integrator.heading_fraction();
        let (sin_h, cos_h) = (theta + h * step.heading_step).sin_cos();
        // Pose partials with respect to the heading the velocity is projected on.
        let dx_dheading = -(vx * sin_h + vy * cos_h) * dt;
        let dy_dheading = (vx * cos_h - vy * sin_h) * dt;
        let dstep_domega = if step.capped { 0.0 } else { dt };

        let mut f = Array2::<f64>::eye(STATE_DIM);
        f[[IDX_X, IDX_THETA]] = dx_dheading;
        f[[IDX_X, IDX_VX]] = cos_h * dt * dvx;
        f[[IDX_X, IDX_VY]] = -sin_h * dt * dvy;
        f[[IDX_X, IDX_OMEGA]] = dx_dheading * h * dstep_domega * domega;

        f[[IDX_Y, IDX_THETA]] = dy_dheading;
        f[[IDX_Y, IDX_VX]] = sin_h * dt * dvx;
        f[[IDX_Y, IDX_VY]] = cos_h * dt * dvy;
        f[[IDX_Y, IDX_OMEGA]] = dy_dheading * h * dstep_domega * domega;

        f[[IDX_THETA, IDX_OMEGA]] = dstep_domega * domega;
        f[[IDX_VX, IDX_VX]] = dvx;
        f[[IDX_VY, IDX_VY]] = dvy;
        f[[IDX_OMEGA, IDX_OMEGA]] = domega;

        (mean, f)
    }

    /// Propagates the estimate `dt` seconds under `control`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::SimConfig;
    /// use drift_gym::common::ext_kal_fltr::EKF;
    /// use drift_gym::simulator::estimator::StateEstimator;
    /// use drift_gym::simulator::vehicle::ControlCommand;
    ///
    /// let estimator = StateEstimator::new(&SimConfig::default());
    /// let prior = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
    /// let next = estimator.predict(&prior, &ControlCommand::physical(2.0, 0.0), 0.02);
    ///
    /// assert!(next.mean[3] > 0.0);
    /// assert!(next.position_variance() > prior.position_variance());
    /// assert!((next.time - 0.02).abs() < 1e-12);
    /// ```
    fn predict(&self, state: &EstimatorState, control: &ControlCommand, dt: f64) -> EstimatorState {
        let (mean, jacobian) = self.calc_transfer_fun(state, control, dt);
        EstimatorState {
            mean,
            covar: propagate_covariance(&state.covar, &jacobian, &self.process_noise),
            time: state.time + dt,
            ..state.clone()
        }
    }

    /// Fuses one measurement. A dropped GPS fix returns the state unchanged.
    fn correct(&self, state: &EstimatorState, measurement: &Measurement) -> EstimatorState {
        let Some(reading) = self.reading(measurement) else {
            trace!("no gps fix at t={:.3}; keeping prediction", measurement.time());
            return state.clone();
        };

        let mut innovation = reading.innovation(&state.mean);
        for (row, value) in innovation.iter_mut().enumerate() {
            if reading.obs_model[[row, IDX_THETA]] != 0.0 {
                *value = wrap_angle(*value);
            }
        }

        let outcome = kalman_update(
            &state.mean,
            &state.covar,
            &reading,
            &innovation,
            self.regularization_epsilon,
            self.max_regularization_attempts,
        );

        let mut next = state.clone();
        if !outcome.applied {
            warn!("dropping measurement at t={:.3}", measurement.time());
            next.skipped_updates += 1;
            return next;
        }
        if outcome.regularized() {
            next.regularized_updates += 1;
        }
        next.mean = outcome.mean;
        next.mean[IDX_THETA] = wrap_angle(next.mean[IDX_THETA]);
        next.covar = outcome.covar;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::linalg::{asymmetry, is_positive_semidefinite};
    use crate::simulator::sensors::{GpsMeasurement, ImuMeasurement, VelocityMeasurement};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn gps(time: f64, position: Option<[f64; 2]>) -> Measurement {
        Measurement::Gps(GpsMeasurement { time, position })
    }

    fn gyro(time: f64, yaw_rate: f64) -> Measurement {
        Measurement::Imu(ImuMeasurement {
            time,
            yaw_rate,
            accel: [0.0, 0.0],
        })
    }

    fn moving_state(estimator: &StateEstimator) -> EstimatorState {
        let mut state = estimator.initial_state([0.4, -1.2, 0.3], 0.0);
        state.mean[IDX_VX] = 1.5;
        state.mean[IDX_VY] = 0.2;
        state.mean[IDX_OMEGA] = 0.8;
        state
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let state = moving_state(&estimator);
        let command = ControlCommand::physical(2.0, 1.0);
        let dt = 0.02;
        let (_, jacobian) = estimator.calc_transfer_fun(&state, &command, dt);

        let h = 1e-6;
        for col in 0..STATE_DIM {
            let mut plus = state.clone();
            let mut minus = state.clone();
            plus.mean[col] += h;
            minus.mean[col] -= h;
            let (fp, _) = estimator.calc_transfer_fun(&plus, &command, dt);
            let (fm, _) = estimator.calc_transfer_fun(&minus, &command, dt);
            for row in 0..STATE_DIM {
                let numeric = (fp[row] - fm[row]) / (2.0 * h);
                assert_abs_diff_eq!(jacobian[[row, col]], numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_predict_at_rest_keeps_mean_and_grows_covariance() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let mut state = estimator.initial_state([1.0, 2.0, 0.5], 0.0);
        let start_mean = state.mean.clone();

        for _ in 0..20 {
            let next = estimator.predict(&state, &ControlCommand::default(), 0.02);
            assert!(next.position_variance() > state.position_variance());
            state = next;
        }
        assert_eq!(state.mean, start_mean);
        assert_abs_diff_eq!(state.time, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_gps_correct_pulls_position_and_shrinks_variance() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let prior = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
        let posterior = estimator.correct(&prior, &gps(0.1, Some([1.0, -1.0])));

        assert!(posterior.mean[IDX_X] > 0.5 && posterior.mean[IDX_X] < 1.0);
        assert!(posterior.mean[IDX_Y] < -0.5 && posterior.mean[IDX_Y] > -1.0);
        assert!(posterior.position_variance() < prior.position_variance());
        assert_eq!(posterior.covar[[IDX_OMEGA, IDX_OMEGA]], prior.covar[[IDX_OMEGA, IDX_OMEGA]]);
    }

    #[test]
    fn test_dropped_gps_leaves_state_unchanged() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let prior = moving_state(&estimator);
        assert_eq!(estimator.correct(&prior, &gps(0.1, None)), prior);
    }

    #[test]
    fn test_gyro_correct_updates_yaw_rate() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let prior = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
        let posterior = estimator.correct(&prior, &gyro(0.01, 1.0));

        assert!(posterior.mean[IDX_OMEGA] > 0.9);
        assert!(posterior.covar[[IDX_OMEGA, IDX_OMEGA]] < 1e-3);
        assert_eq!(posterior.mean[IDX_X], 0.0);
    }

    #[test]
    fn test_odometry_correct_shrinks_speed_uncertainty() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let prior = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
        let posterior = estimator.correct(
            &prior,
            &Measurement::Velocity(VelocityMeasurement { time: 0.02, speed: 1.0 }),
        );

        assert!(posterior.summary().speed_std < prior.summary().speed_std);
        assert!(posterior.mean[IDX_VX] > 0.9 && posterior.mean[IDX_VX] < 1.0);
        assert_abs_diff_eq!(posterior.mean[IDX_OMEGA], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(posterior.covar[[IDX_X, IDX_X]], prior.covar[[IDX_X, IDX_X]], epsilon = 1e-12);
    }

    #[test]
    fn test_std_devs_are_diagonal_roots() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let stds = estimator.initial_state([0.0, 0.0, 0.0], 0.0).std_devs();
        assert_abs_diff_eq!(stds[IDX_X], 1.0);
        assert_abs_diff_eq!(stds[IDX_VX], 0.5f64.sqrt(), epsilon = 1e-15);
        assert_abs_diff_eq!(stds[IDX_OMEGA], 0.1f64.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn test_noiseless_gps_snaps_position_in_one_correct() {
        let mut config = SimConfig::default();
        config.gps.noise_std = 0.0;
        let estimator = StateEstimator::new(&config);

        let prior = estimator.initial_state([0.7, -0.4, 0.0], 0.0);
        let posterior = estimator.correct(&prior, &gps(0.1, Some([0.0, 0.0])));

        assert_abs_diff_eq!(posterior.mean[IDX_X], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(posterior.mean[IDX_Y], 0.0, epsilon = 1e-6);
        assert!(posterior.position_variance() < 1e-9);
        assert_eq!(posterior.regularized_updates, 0);
    }

    #[test]
    fn test_degenerate_correct_is_regularized_not_nan() {
        let mut config = SimConfig::default();
        config.gps.noise_std = 0.0;
        let estimator = StateEstimator::new(&config);

        // A noiseless fix collapses the position variance; a second noiseless
        // fix then faces a singular innovation covariance.
        let state = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
        let state = estimator.correct(&state, &gps(0.1, Some([0.1, 0.1])));
        let state = estimator.correct(&state, &gps(0.1, Some([0.1, 0.1])));

        assert!(state.mean.iter().all(|v| v.is_finite()));
        assert!(state.covar.iter().all(|v| v.is_finite()));
        assert!(state.regularized_updates >= 1);
        assert_eq!(state.skipped_updates, 0);
    }

    #[test]
    fn test_summary_linearizes_speed_uncertainty() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let mut state = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
        state.mean[IDX_VX] = 3.0;
        state.mean[IDX_VY] = 4.0;
        state.covar[[IDX_VX, IDX_VX]] = 0.25;
        state.covar[[IDX_VY, IDX_VY]] = 1.0;

        let summary = state.summary();
        assert_abs_diff_eq!(summary.speed, 5.0);
        // (0.6² · 0.25 + 0.8² · 1.0) = 0.73
        assert_abs_diff_eq!(summary.speed_std, 0.73f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(summary.yaw_rate_std, 0.1f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_heading_stays_wrapped() {
        let estimator = StateEstimator::new(&SimConfig::default());
        let mut state = estimator.initial_state([0.0, 0.0, 3.1], 0.0);
        state.mean[IDX_OMEGA] = 2.0;
        for _ in 0..10 {
            state = estimator.predict(&state, &ControlCommand::physical(0.0, 2.0), 0.02);
        }
        assert!(state.mean[IDX_THETA] < 0.0 && state.mean[IDX_THETA] >= -std::f64::consts::PI);
    }

    proptest! {
        #[test]
        fn prop_covariance_stays_symmetric_psd(
            steps in prop::collection::vec(
                (-4.0f64..4.0, -3.0f64..3.0, prop::option::of((-5.0f64..5.0, -5.0f64..5.0)), -3.0f64..3.0),
                1..150,
            ),
        ) {
            let estimator = StateEstimator::new(&SimConfig::default());
            let mut state = estimator.initial_state([0.0, 0.0, 0.0], 0.0);
            for (v, w, fix, yaw_rate) in steps {
                state = estimator.predict(&state, &ControlCommand::physical(v, w), 0.02);
                state = estimator.correct(&state, &gyro(state.time, yaw_rate));
                state = estimator.correct(&state, &gps(state.time, fix.map(|(x, y)| [x, y])));

                prop_assert!(state.covar.diag().iter().all(|v| *v >= 0.0));
                prop_assert!(asymmetry(&state.covar) == 0.0);
                prop_assert!(is_positive_semidefinite(&state.covar, 1e-9));
            }
        }
    }
}
