//! One simulated episode: true dynamics, sensors and the filter driven tick
//! by tick from a single seeded generator.
//!
//! Each physics tick advances the vehicle, predicts the filter over the tick,
//! then feeds it every IMU sample, every wheel-odometry sample and every GPS
//! sample that fell due, in that order. Samples due inside the tick are applied at the end-of-tick filter
//! time.

use crate::common::config::{EstimatorInit, SimConfig};
use crate::common::errors::{ConfigResult, StateResult};
use crate::common::ext_kal_fltr::EKF;
use crate::simulator::estimator::{Estimate, EstimatorState, StateEstimator};
use crate::simulator::sensors::{
    gaussian, GpsMeasurement, GpsSensor, GpsState, ImuMeasurement, ImuSensor, ImuState, Measurement,
    VelocityMeasurement, VelocitySensor, VelocityState,
};
use crate::simulator::vehicle::{BodyAttitude, ControlCommand, VehicleDynamics, VehicleState};
use log::{debug, error, trace};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// What happened during one physics tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Simulated time at the end of the tick.
    pub time: f64,
    pub vehicle: VehicleState,
    pub estimate: Estimate,
    /// GPS samples taken this tick, dropped ones included.
    pub gps: Vec<GpsMeasurement>,
    pub imu: Vec<ImuMeasurement>,
    pub velocity: Vec<VelocityMeasurement>,
}

/// Owns every piece of per-episode state. Nothing here outlives the episode.
#[derive(Debug, Clone)]
pub struct Episode {
    config: SimConfig,
    seed: u64,
    rng: ChaCha8Rng,
    dynamics: VehicleDynamics,
    gps: GpsSensor,
    imu: ImuSensor,
    odometry: VelocitySensor,
    estimator: StateEstimator,
    vehicle: VehicleState,
    gps_state: GpsState,
    imu_state: ImuState,
    odometry_state: VelocityState,
    estimate: EstimatorState,
    steps: u64,
}

impl Episode {
    /// Starts a new episode.
    ///
    /// The start pose is the configured pose plus Gaussian jitter, the IMU
    /// biases are drawn, and the filter is initialized with P₀ around either
    /// the sampled pose or the nominal one.
    ///
    /// # Arguments
    ///
    /// * `config` - Simulator configuration; validated here.
    /// * `seed` - Seed for the episode's only random generator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::SimConfig;
    /// use drift_gym::simulator::episode::Episode;
    /// use drift_gym::simulator::vehicle::ControlCommand;
    ///
    /// let mut episode = Episode::reset(SimConfig::default(), 42).unwrap();
    /// let command = ControlCommand::from_normalized(0.5, 0.2, &episode.config().dynamics);
    /// let report = episode.step(&command).unwrap();
    ///
    /// assert!((report.time - 0.02).abs() < 1e-12);
    /// assert_eq!(report.imu.len(), 2);
    /// assert_eq!(report.velocity.len(), 1);
    /// assert!(report.gps.is_empty());
    /// ```
    pub fn reset(config: SimConfig, seed: u64) -> ConfigResult<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let start = &config.start;
        let x = start.x + gaussian(&mut rng, start.position_std);
        let y = start.y + gaussian(&mut rng, start.position_std);
        let theta = start.theta + gaussian(&mut rng, start.heading_std);
        let mut vehicle = VehicleState::at_rest(x, y, theta);
        if config.use_3d_dynamics {
            vehicle.attitude = Some(BodyAttitude::default());
        }

        let gps = GpsSensor::new(config.gps.clone(), config.noise_enabled);
        let imu = ImuSensor::new(config.imu.clone(), config.noise_enabled);
        let imu_state = imu.reset(0.0, &mut rng);
        let odometry = VelocitySensor::new(config.velocity.clone(), config.noise_enabled);

        let estimator = StateEstimator::new(&config);
        let initial_pose = match config.estimator.init {
            EstimatorInit::GroundTruth => [vehicle.x, vehicle.y, vehicle.theta],
            EstimatorInit::Configured => [start.x, start.y, start.theta],
        };
        let estimate = estimator.initial_state(initial_pose, 0.0);

        debug!(
            "episode reset: seed={seed} scenario={} start=({:.3}, {:.3}, {:.3}) gyro_bias={:.5}",
            config.scenario.name, vehicle.x, vehicle.y, vehicle.theta, imu_state.gyro_bias
        );

        Ok(Self {
            dynamics: VehicleDynamics::new(config.dynamics.clone(), config.use_3d_dynamics),
            config,
            seed,
            rng,
            gps,
            imu,
            odometry,
            estimator,
            vehicle,
            gps_state: GpsState::new(0.0),
            imu_state,
            odometry_state: VelocityState::new(0.0),
            estimate,
            steps: 0,
        })
    }

    /// Runs one physics tick under `command`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NonFinite`](crate::common::errors::StateError::NonFinite)
    /// if the tick produced a non-finite vehicle state. The episode is left at
    /// the last valid state and should be terminated.
    pub fn step(&mut self, command: &ControlCommand) -> StateResult<TickReport> {
        let dt = self.config.physics_dt;
        let vehicle = self.dynamics.step(&self.vehicle, command, dt);
        if let Err(err) = vehicle.validate() {
            error!("terminating episode (seed {}) at step {}: {err}", self.seed, self.steps);
            return Err(err);
        }

        self.vehicle = vehicle;
        self.steps += 1;
        let time = self.time();
        self.estimate = self.estimator.predict(&self.estimate, command, dt);

        let mut imu_samples = Vec::new();
        loop {
            let (state, sample) = self.imu.observe(
                &self.imu_state,
                vehicle.omega,
                [vehicle.accel_x, vehicle.accel_y],
                time,
                &mut self.rng,
            );
            self.imu_state = state;
            let Some(sample) = sample else { break };
            self.estimate = self.estimator.correct(&self.estimate, &Measurement::Imu(sample));
            imu_samples.push(sample);
        }

        let mut odometry_samples = Vec::new();
        loop {
            let (state, sample) = self.odometry.observe(&self.odometry_state, vehicle.vx, time, &mut self.rng);
            self.odometry_state = state;
            let Some(sample) = sample else { break };
            self.estimate = self.estimator.correct(&self.estimate, &Measurement::Velocity(sample));
            odometry_samples.push(sample);
        }

        let mut gps_samples = Vec::new();
        loop {
            let (state, sample) = self.gps.observe(&self.gps_state, vehicle.position(), time, &mut self.rng);
            self.gps_state = state;
            let Some(sample) = sample else { break };
            self.estimate = self.estimator.correct(&self.estimate, &Measurement::Gps(sample));
            gps_samples.push(sample);
        }

        trace!(
            "t={time:.3} imu={} odometry={} gps={} pos_var={:.4}",
            imu_samples.len(),
            odometry_samples.len(),
            gps_samples.len(),
            self.estimate.position_variance()
        );

        Ok(TickReport {
            time,
            vehicle,
            estimate: self.estimate.summary(),
            gps: gps_samples,
            imu: imu_samples,
            velocity: odometry_samples,
        })
    }

    pub fn vehicle(&self) -> &VehicleState {
        &self.vehicle
    }

    pub fn estimator_state(&self) -> &EstimatorState {
        &self.estimate
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.steps as f64 * self.config.physics_dt
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn gps_state(&self) -> &GpsState {
        &self.gps_state
    }

    pub fn imu_state(&self) -> &ImuState {
        &self.imu_state
    }

    pub fn odometry_state(&self) -> &VelocityState {
        &self.odometry_state
    }
}
