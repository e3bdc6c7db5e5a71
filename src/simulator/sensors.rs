//! GPS, IMU and wheel-odometry measurement models.
//!
//! Sensors are immutable calibration holders. Their stochastic state (GPS
//! drift, IMU biases, emission schedule) is a plain value threaded through
//! `observe`, and every random draw comes from the caller's generator, so an
//! episode replays exactly from its seed.
//!
//! Emission is scheduled on simulated time: sample `n` is due at
//! `start_time + n·period`. A query at or after the due time emits one sample
//! stamped with its due time; querying again at the same time emits the next
//! due sample, if any. A driver whose tick is longer than a sensor period can
//! loop until `None` to collect every sample due in that tick.

use crate::common::config::{GpsConfig, ImuConfig, VelocityConfig};
use log::trace;
use rand::Rng;
use rand_distr::StandardNormal;

/// Slack when comparing simulated time against a due time.
pub const TIME_EPSILON: f64 = 1e-9;

/// Draws from `N(0, std²)`.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    std * z
}

/// A GPS sample. `position` is `None` when the fix was dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsMeasurement {
    /// Simulated time the sample was due, seconds.
    pub time: f64,
    pub position: Option<[f64; 2]>,
}

impl GpsMeasurement {
    pub fn is_valid(&self) -> bool {
        self.position.is_some()
    }
}

/// An IMU sample: gyro yaw rate and planar body-frame acceleration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuMeasurement {
    pub time: f64,
    /// rad/s
    pub yaw_rate: f64,
    /// `[ax, ay]`, m/s²
    pub accel: [f64; 2],
}

/// A wheel-odometry sample of the longitudinal body speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityMeasurement {
    pub time: f64,
    /// m/s
    pub speed: f64,
}

/// Any measurement the estimator can consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Gps(GpsMeasurement),
    Imu(ImuMeasurement),
    Velocity(VelocityMeasurement),
}

impl Measurement {
    pub fn time(&self) -> f64 {
        match self {
            Measurement::Gps(m) => m.time,
            Measurement::Imu(m) => m.time,
            Measurement::Velocity(m) => m.time,
        }
    }
}

/// Emission schedule shared by all sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Schedule {
    start_time: f64,
    samples: u64,
}

impl Schedule {
    fn new(start_time: f64) -> Self {
        Self {
            start_time,
            samples: 0,
        }
    }

    fn next_due(&self, period: f64) -> f64 {
        self.start_time + (self.samples + 1) as f64 * period
    }

    fn is_due(&self, period: f64, sim_time: f64) -> bool {
        sim_time + TIME_EPSILON >= self.next_due(period)
    }
}

/// Per-episode GPS state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsState {
    schedule: Schedule,
    /// Accumulated random-walk drift per axis, meters.
    pub drift: [f64; 2],
    /// Number of due samples that were dropped.
    pub dropped: u64,
}

impl GpsState {
    /// Fresh state at episode reset: no drift, first sample one period after
    /// `start_time`.
    pub fn new(start_time: f64) -> Self {
        Self {
            schedule: Schedule::new(start_time),
            drift: [0.0; 2],
            dropped: 0,
        }
    }

    /// Samples emitted so far, including dropped ones.
    pub fn samples(&self) -> u64 {
        self.schedule.samples
    }
}

/// GPS measurement model: Gaussian noise plus random-walk drift, with
/// Bernoulli dropout.
#[derive(Debug, Clone)]
pub struct GpsSensor {
    config: GpsConfig,
    noise_enabled: bool,
}

impl GpsSensor {
    pub fn new(config: GpsConfig, noise_enabled: bool) -> Self {
        Self {
            config,
            noise_enabled,
        }
    }

    pub fn config(&self) -> &GpsConfig {
        &self.config
    }

    /// Time the next sample is due.
    pub fn next_due(&self, state: &GpsState) -> f64 {
        state.schedule.next_due(self.config.period())
    }

    /// Queries the GPS at `sim_time`.
    ///
    /// # Arguments
    ///
    /// * `state` - GPS state from the previous query or reset.
    /// * `true_position` - True `[x, y]` in meters.
    /// * `sim_time` - Current simulated time in seconds.
    /// * `rng` - The episode's generator.
    ///
    /// # Returns
    ///
    /// The updated state and, if a sample was due, the measurement. A dropped
    /// sample is returned with `position: None`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::GpsConfig;
    /// use drift_gym::simulator::sensors::{GpsSensor, GpsState};
    /// use rand::SeedableRng;
    /// use rand_chacha::ChaCha8Rng;
    ///
    /// let gps = GpsSensor::new(GpsConfig::default(), false);
    /// let mut rng = ChaCha8Rng::seed_from_u64(7);
    /// let state = GpsState::new(0.0);
    ///
    /// let (state, early) = gps.observe(&state, [1.0, 2.0], 0.05, &mut rng);
    /// assert!(early.is_none());
    ///
    /// let (_, fix) = gps.observe(&state, [1.0, 2.0], 0.1, &mut rng);
    /// assert_eq!(fix.unwrap().position, Some([1.0, 2.0]));
    /// ```
    pub fn observe<R: Rng + ?Sized>(
        &self,
        state: &GpsState,
        true_position: [f64; 2],
        sim_time: f64,
        rng: &mut R,
    ) -> (GpsState, Option<GpsMeasurement>) {
        let period = self.config.period();
        if !state.schedule.is_due(period, sim_time) {
            return (*state, None);
        }

        let mut next = *state;
        let time = next.schedule.next_due(period);
        next.schedule.samples += 1;

        if !self.noise_enabled {
            return (
                next,
                Some(GpsMeasurement {
                    time,
                    position: Some(true_position),
                }),
            );
        }

        if state.schedule.samples > 0 {
            let step = self.config.drift_rate * period.sqrt();
            for drift in next.drift.iter_mut() {
                *drift += gaussian(rng, step);
            }
        }

        if rng.gen_bool(self.config.dropout_probability) {
            next.dropped += 1;
            trace!("gps sample at t={time:.3} dropped");
            return (next, Some(GpsMeasurement { time, position: None }));
        }

        let position = [
            true_position[0] + next.drift[0] + gaussian(rng, self.config.noise_std),
            true_position[1] + next.drift[1] + gaussian(rng, self.config.noise_std),
        ];
        (
            next,
            Some(GpsMeasurement {
                time,
                position: Some(position),
            }),
        )
    }
}

/// Per-episode IMU state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuState {
    schedule: Schedule,
    /// Gyro bias, rad/s.
    pub gyro_bias: f64,
    /// Accelerometer bias `[ax, ay]`, m/s².
    pub accel_bias: [f64; 2],
}

impl ImuState {
    /// Fresh state at episode reset with biases drawn from their initial
    /// distributions (zero when noise is disabled).
    pub fn new<R: Rng + ?Sized>(config: &ImuConfig, noise_enabled: bool, start_time: f64, rng: &mut R) -> Self {
        let (gyro_bias, accel_bias) = if noise_enabled {
            (
                gaussian(rng, config.gyro_bias_std),
                [gaussian(rng, config.accel_bias_std), gaussian(rng, config.accel_bias_std)],
            )
        } else {
            (0.0, [0.0; 2])
        };
        Self {
            schedule: Schedule::new(start_time),
            gyro_bias,
            accel_bias,
        }
    }

    pub fn samples(&self) -> u64 {
        self.schedule.samples
    }
}

/// IMU measurement model: white noise on top of biases that evolve as random
/// walks (the accelerometer bias only when a walk coefficient is configured).
#[derive(Debug, Clone)]
pub struct ImuSensor {
    config: ImuConfig,
    noise_enabled: bool,
}

impl ImuSensor {
    pub fn new(config: ImuConfig, noise_enabled: bool) -> Self {
        Self {
            config,
            noise_enabled,
        }
    }

    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    /// Builds the reset state for this sensor.
    pub fn reset<R: Rng + ?Sized>(&self, start_time: f64, rng: &mut R) -> ImuState {
        ImuState::new(&self.config, self.noise_enabled, start_time, rng)
    }

    /// Queries the IMU at `sim_time`.
    ///
    /// # Arguments
    ///
    /// * `state` - IMU state from the previous query or reset.
    /// * `true_yaw_rate` - True yaw rate in rad/s.
    /// * `true_accel` - True body-frame acceleration `[ax, ay]` in m/s².
    /// * `sim_time` - Current simulated time in seconds.
    /// * `rng` - The episode's generator.
    ///
    /// # Returns
    ///
    /// The updated state and, if a sample was due, the measurement.
    pub fn observe<R: Rng + ?Sized>(
        &self,
        state: &ImuState,
        true_yaw_rate: f64,
        true_accel: [f64; 2],
        sim_time: f64,
        rng: &mut R,
    ) -> (ImuState, Option<ImuMeasurement>) {
        let period = self.config.period();
        if !state.schedule.is_due(period, sim_time) {
            return (*state, None);
        }

        let mut next = *state;
        let time = next.schedule.next_due(period);
        next.schedule.samples += 1;

        if !self.noise_enabled {
            return (
                next,
                Some(ImuMeasurement {
                    time,
                    yaw_rate: true_yaw_rate,
                    accel: true_accel,
                }),
            );
        }

        if state.schedule.samples > 0 {
            let sqrt_dt = period.sqrt();
            next.gyro_bias += sqrt_dt * gaussian(rng, 1.0) * self.config.gyro_bias_walk;
            if let Some(walk) = self.config.accel_bias_walk {
                for bias in next.accel_bias.iter_mut() {
                    *bias += sqrt_dt * gaussian(rng, 1.0) * walk;
                }
            }
        }

        let yaw_rate = true_yaw_rate + next.gyro_bias + gaussian(rng, self.config.gyro_noise_std);
        let accel = [
            true_accel[0] + next.accel_bias[0] + gaussian(rng, self.config.accel_noise_std),
            true_accel[1] + next.accel_bias[1] + gaussian(rng, self.config.accel_noise_std),
        ];
        (
            next,
            Some(ImuMeasurement {
                time,
                yaw_rate,
                accel,
            }),
        )
    }
}

/// Per-episode wheel odometry state: only the emission schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityState {
    schedule: Schedule,
}

impl VelocityState {
    pub fn new(start_time: f64) -> Self {
        Self {
            schedule: Schedule::new(start_time),
        }
    }

    pub fn samples(&self) -> u64 {
        self.schedule.samples
    }
}

/// Wheel odometry: the longitudinal speed with white noise.
#[derive(Debug, Clone)]
pub struct VelocitySensor {
    config: VelocityConfig,
    noise_enabled: bool,
}

impl VelocitySensor {
    pub fn new(config: VelocityConfig, noise_enabled: bool) -> Self {
        Self {
            config,
            noise_enabled,
        }
    }

    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// Queries the odometry at `sim_time`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::VelocityConfig;
    /// use drift_gym::simulator::sensors::{VelocitySensor, VelocityState};
    /// use rand::SeedableRng;
    /// use rand_chacha::ChaCha8Rng;
    ///
    /// let odometry = VelocitySensor::new(VelocityConfig::default(), false);
    /// let mut rng = ChaCha8Rng::seed_from_u64(1);
    ///
    /// let (state, sample) = odometry.observe(&VelocityState::new(0.0), 1.25, 0.02, &mut rng);
    /// assert_eq!(sample.unwrap().speed, 1.25);
    /// assert!(odometry.observe(&state, 1.25, 0.03, &mut rng).1.is_none());
    /// ```
    pub fn observe<R: Rng + ?Sized>(
        &self,
        state: &VelocityState,
        true_speed: f64,
        sim_time: f64,
        rng: &mut R,
    ) -> (VelocityState, Option<VelocityMeasurement>) {
        let period = self.config.period();
        if !state.schedule.is_due(period, sim_time) {
            return (*state, None);
        }

        let mut next = *state;
        let time = next.schedule.next_due(period);
        next.schedule.samples += 1;

        let speed = if self.noise_enabled {
            true_speed + gaussian(rng, self.config.noise_std)
        } else {
            true_speed
        };
        (next, Some(VelocityMeasurement { time, speed }))
    }
}
