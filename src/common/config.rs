//! Calibration and episode configuration.
//!
//! Every constant the simulator core uses (vehicle limits, actuator lag,
//! sensor noise, update rates, Q and P₀) lives here. Configuration is loaded
//! once, validated with [`SimConfig::validate`], and never mutated by an
//! episode.

use crate::common::errors::{ConfigError, ConfigResult};
use crate::common::linalg::{asymmetry, cholesky};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Number of estimated states: x, y, θ, vx, vy, ω.
pub const STATE_DIM: usize = 6;

/// Top-level configuration for one simulated vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed physics timestep in seconds.
    pub physics_dt: f64,
    /// When false, sensors report the true state at their nominal rates.
    pub noise_enabled: bool,
    /// Enables the additive pitch/roll model.
    pub use_3d_dynamics: bool,
    pub dynamics: DynamicsConfig,
    pub gps: GpsConfig,
    pub imu: ImuConfig,
    pub velocity: VelocityConfig,
    pub estimator: EstimatorConfig,
    pub start: StartConfig,
    pub scenario: ScenarioConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            physics_dt: 0.02,
            noise_enabled: true,
            use_3d_dynamics: false,
            dynamics: DynamicsConfig::default(),
            gps: GpsConfig::default(),
            imu: ImuConfig::default(),
            velocity: VelocityConfig::default(),
            estimator: EstimatorConfig::default(),
            start: StartConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parses a JSON document and validates it.
    ///
    /// Missing fields take their default values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::config::SimConfig;
    ///
    /// let config = SimConfig::from_json_str(r#"{ "physics_dt": 0.05, "gps": { "rate_hz": 5.0 } }"#).unwrap();
    /// assert_eq!(config.physics_dt, 0.05);
    /// assert_eq!(config.gps.rate_hz, 5.0);
    /// assert_eq!(config.gps.noise_std, 0.3);
    ///
    /// assert!(SimConfig::from_json_str(r#"{ "physics_dt": -1.0 }"#).is_err());
    /// ```
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every parameter, failing on the first invalid one.
    pub fn validate(&self) -> ConfigResult<()> {
        positive("physics_dt", self.physics_dt)?;
        self.dynamics.validate()?;
        self.gps.validate()?;
        self.imu.validate()?;
        self.velocity.validate()?;
        self.estimator.validate()?;
        self.start.validate()?;
        self.scenario.validate()
    }
}

/// Numerical integration scheme for the pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrator {
    /// Semi-implicit Euler: velocities first, then pose with the new velocities.
    Euler,
    /// Like `Euler`, but the pose is advanced along the half-step heading.
    #[default]
    Midpoint,
}

impl Integrator {
    /// Fraction of the heading change applied before projecting velocity.
    pub fn heading_fraction(self) -> f64 {
        match self {
            Integrator::Euler => 0.0,
            Integrator::Midpoint => 0.5,
        }
    }
}

/// Vehicle limits, actuator response and slip approximation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    /// Wheelbase in meters; geometry only.
    pub wheelbase: f64,
    /// Vehicle width in meters; geometry only.
    pub width: f64,
    /// Longitudinal speed limit in m/s (also the command scale).
    pub max_speed: f64,
    /// Yaw-rate limit in rad/s (also the command scale).
    pub max_yaw_rate: f64,
    /// Time constant of the velocity actuator in seconds.
    pub velocity_time_constant: f64,
    /// Time constant of the yaw-rate actuator in seconds.
    pub yaw_rate_time_constant: f64,
    /// Largest heading change allowed in a single step, in radians.
    pub max_heading_step: f64,
    pub integrator: Integrator,
    pub slip: SlipConfig,
    pub suspension: SuspensionConfig,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            wheelbase: 0.324,
            width: 0.48,
            max_speed: 4.0,
            max_yaw_rate: 3.0,
            velocity_time_constant: 0.1,
            yaw_rate_time_constant: 0.05,
            max_heading_step: 0.5,
            integrator: Integrator::default(),
            slip: SlipConfig::default(),
            suspension: SuspensionConfig::default(),
        }
    }
}

impl DynamicsConfig {
    fn validate(&self) -> ConfigResult<()> {
        positive("dynamics.wheelbase", self.wheelbase)?;
        positive("dynamics.width", self.width)?;
        positive("dynamics.max_speed", self.max_speed)?;
        positive("dynamics.max_yaw_rate", self.max_yaw_rate)?;
        non_negative("dynamics.velocity_time_constant", self.velocity_time_constant)?;
        non_negative("dynamics.yaw_rate_time_constant", self.yaw_rate_time_constant)?;
        positive("dynamics.max_heading_step", self.max_heading_step)?;
        self.slip.validate()?;
        self.suspension.validate()
    }
}

/// Lateral slip approximation used while drifting.
///
/// The lateral body velocity relaxes toward `-gain(|vx|)·vx·ω`, where `gain`
/// is linearly interpolated over `speed_breakpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlipConfig {
    pub enabled: bool,
    /// Longitudinal speeds in m/s, strictly increasing.
    pub speed_breakpoints: Vec<f64>,
    /// Slip gain in seconds at each breakpoint.
    pub gains: Vec<f64>,
    /// Time constant of the lateral velocity response in seconds.
    pub relaxation_time: f64,
    /// Lateral speed limit in m/s.
    pub max_lateral_speed: f64,
}

impl Default for SlipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed_breakpoints: vec![0.0, 1.5, 4.0],
            gains: vec![0.0, 0.0, 0.08],
            relaxation_time: 0.15,
            max_lateral_speed: 2.0,
        }
    }
}

impl SlipConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.speed_breakpoints.len() < 2 {
            return Err(ConfigError::DimensionMismatch {
                name: "dynamics.slip.speed_breakpoints",
                expected: 2,
                actual: self.speed_breakpoints.len(),
            });
        }
        if self.gains.len() != self.speed_breakpoints.len() {
            return Err(ConfigError::DimensionMismatch {
                name: "dynamics.slip.gains",
                expected: self.speed_breakpoints.len(),
                actual: self.gains.len(),
            });
        }
        if self.speed_breakpoints.iter().any(|v| !v.is_finite())
            || self.speed_breakpoints.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(ConfigError::UnsortedBreakpoints {
                name: "dynamics.slip.speed_breakpoints",
            });
        }
        for &gain in &self.gains {
            non_negative("dynamics.slip.gains", gain)?;
        }
        non_negative("dynamics.slip.relaxation_time", self.relaxation_time)?;
        positive("dynamics.slip.max_lateral_speed", self.max_lateral_speed)
    }
}

/// Simplified pitch/roll response used in 3D mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionConfig {
    /// Height of the centre of gravity above the ground in meters.
    pub cg_height: f64,
    /// Roll angle reached at full lateral load transfer, in radians.
    pub max_roll: f64,
    /// Pitch angle reached at full longitudinal load transfer, in radians.
    pub max_pitch: f64,
    /// Natural frequency of the body modes in rad/s.
    pub natural_frequency: f64,
    pub damping_ratio: f64,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            cg_height: 0.07,
            max_roll: 0.12,
            max_pitch: 0.06,
            natural_frequency: 8.0,
            damping_ratio: 0.7,
        }
    }
}

impl SuspensionConfig {
    fn validate(&self) -> ConfigResult<()> {
        non_negative("dynamics.suspension.cg_height", self.cg_height)?;
        non_negative("dynamics.suspension.max_roll", self.max_roll)?;
        non_negative("dynamics.suspension.max_pitch", self.max_pitch)?;
        positive("dynamics.suspension.natural_frequency", self.natural_frequency)?;
        non_negative("dynamics.suspension.damping_ratio", self.damping_ratio)
    }
}

/// GPS calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub rate_hz: f64,
    /// White position noise per axis, meters.
    pub noise_std: f64,
    /// Drift random-walk intensity, m/√s.
    pub drift_rate: f64,
    /// Probability that a due sample is dropped.
    pub dropout_probability: f64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            noise_std: 0.3,
            drift_rate: 0.005,
            dropout_probability: 0.005,
        }
    }
}

impl GpsConfig {
    /// Seconds between samples.
    pub fn period(&self) -> f64 {
        1.0 / self.rate_hz
    }

    fn validate(&self) -> ConfigResult<()> {
        positive("gps.rate_hz", self.rate_hz)?;
        non_negative("gps.noise_std", self.noise_std)?;
        non_negative("gps.drift_rate", self.drift_rate)?;
        probability("gps.dropout_probability", self.dropout_probability)
    }
}

/// IMU calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    pub rate_hz: f64,
    /// Gyro white noise, rad/s.
    pub gyro_noise_std: f64,
    /// Std of the initial gyro bias, rad/s.
    pub gyro_bias_std: f64,
    /// Gyro bias random-walk coefficient, rad/s/√s.
    pub gyro_bias_walk: f64,
    /// Accelerometer white noise, m/s².
    pub accel_noise_std: f64,
    /// Std of the initial accelerometer bias, m/s².
    pub accel_bias_std: f64,
    /// Accelerometer bias random-walk coefficient, m/s²/√s. `None` keeps the
    /// bias static for the whole episode.
    pub accel_bias_walk: Option<f64>,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            rate_hz: 100.0,
            gyro_noise_std: 0.0087,
            gyro_bias_std: 0.0017,
            gyro_bias_walk: 0.001,
            accel_noise_std: 0.015,
            accel_bias_std: 0.049,
            accel_bias_walk: None,
        }
    }
}

impl ImuConfig {
    /// Seconds between samples.
    pub fn period(&self) -> f64 {
        1.0 / self.rate_hz
    }

    fn validate(&self) -> ConfigResult<()> {
        positive("imu.rate_hz", self.rate_hz)?;
        non_negative("imu.gyro_noise_std", self.gyro_noise_std)?;
        non_negative("imu.gyro_bias_std", self.gyro_bias_std)?;
        non_negative("imu.gyro_bias_walk", self.gyro_bias_walk)?;
        non_negative("imu.accel_noise_std", self.accel_noise_std)?;
        non_negative("imu.accel_bias_std", self.accel_bias_std)?;
        if let Some(walk) = self.accel_bias_walk {
            non_negative("imu.accel_bias_walk", walk)?;
        }
        Ok(())
    }
}

/// Wheel odometry calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    pub rate_hz: f64,
    /// White noise on the longitudinal speed, m/s.
    pub noise_std: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            noise_std: 0.05,
        }
    }
}

impl VelocityConfig {
    /// Seconds between samples.
    pub fn period(&self) -> f64 {
        1.0 / self.rate_hz
    }

    fn validate(&self) -> ConfigResult<()> {
        positive("velocity.rate_hz", self.rate_hz)?;
        non_negative("velocity.noise_std", self.noise_std)
    }
}

/// Where the estimator's initial mean comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorInit {
    /// The sampled true start pose.
    #[default]
    GroundTruth,
    /// The nominal pose in [`StartConfig`], ignoring start jitter.
    Configured,
}

/// Initial covariance, either as a diagonal or a full matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CovarianceSpec {
    Diagonal([f64; STATE_DIM]),
    Full(Vec<Vec<f64>>),
}

impl CovarianceSpec {
    /// Builds the covariance matrix. Rows of a malformed `Full` matrix are
    /// truncated or zero-padded; [`EstimatorConfig::validate`] rejects them.
    pub fn to_matrix(&self) -> Array2<f64> {
        match self {
            CovarianceSpec::Diagonal(diag) => Array2::from_diag(&Array1::from(diag.to_vec())),
            CovarianceSpec::Full(rows) => {
                let mut m = Array2::<f64>::zeros((STATE_DIM, STATE_DIM));
                for (i, row) in rows.iter().take(STATE_DIM).enumerate() {
                    for (j, v) in row.iter().take(STATE_DIM).enumerate() {
                        m[[i, j]] = *v;
                    }
                }
                m
            }
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        const NAME: &str = "estimator.initial_covariance";
        if let CovarianceSpec::Full(rows) = self {
            if rows.len() != STATE_DIM {
                return Err(ConfigError::DimensionMismatch {
                    name: NAME,
                    expected: STATE_DIM,
                    actual: rows.len(),
                });
            }
            if let Some(row) = rows.iter().find(|row| row.len() != STATE_DIM) {
                return Err(ConfigError::DimensionMismatch {
                    name: NAME,
                    expected: STATE_DIM,
                    actual: row.len(),
                });
            }
        }
        let m = self.to_matrix();
        if asymmetry(&m) > 1e-12 || cholesky(&m).is_none() {
            return Err(ConfigError::NotPositiveDefinite { name: NAME });
        }
        Ok(())
    }
}

/// EKF tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Diagonal of Q, added once per predict step.
    pub process_noise: [f64; STATE_DIM],
    pub initial_covariance: CovarianceSpec,
    pub init: EstimatorInit,
    /// First diagonal loading tried when the innovation covariance is singular.
    pub regularization_epsilon: f64,
    /// How many times the loading is multiplied by 10 before a correction is skipped.
    pub max_regularization_attempts: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            process_noise: [0.01, 0.01, 0.0025, 0.04, 0.04, 0.0025],
            initial_covariance: CovarianceSpec::Diagonal([1.0, 1.0, 0.1, 0.5, 0.5, 0.1]),
            init: EstimatorInit::default(),
            regularization_epsilon: 1e-9,
            max_regularization_attempts: 6,
        }
    }
}

impl EstimatorConfig {
    /// Q as a matrix.
    pub fn process_noise_matrix(&self) -> Array2<f64> {
        Array2::from_diag(&Array1::from(self.process_noise.to_vec()))
    }

    fn validate(&self) -> ConfigResult<()> {
        for &q in &self.process_noise {
            non_negative("estimator.process_noise", q)?;
        }
        self.initial_covariance.validate()?;
        positive("estimator.regularization_epsilon", self.regularization_epsilon)
    }
}

/// Nominal start pose and the spread used to randomize it per episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartConfig {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Std of the Gaussian jitter added to x and y, meters.
    pub position_std: f64,
    /// Std of the Gaussian jitter added to the heading, radians.
    pub heading_std: f64,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
            position_std: 0.1,
            heading_std: 0.05,
        }
    }
}

impl StartConfig {
    fn validate(&self) -> ConfigResult<()> {
        finite("start.x", self.x)?;
        finite("start.y", self.y)?;
        finite("start.theta", self.theta)?;
        non_negative("start.position_std", self.position_std)?;
        non_negative("start.heading_std", self.heading_std)
    }
}

/// Scenario description handed through to the environment shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    /// Width of the gate the vehicle drifts through, meters.
    pub gate_width: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "loose".to_string(),
            gate_width: 1.5,
        }
    }
}

impl ScenarioConfig {
    fn validate(&self) -> ConfigResult<()> {
        positive("scenario.gate_width", self.gate_width)
    }
}

fn finite(name: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

fn positive(name: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}

fn probability(name: &'static str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dynamics.max_speed, 4.0);
        assert_eq!(config.dynamics.max_yaw_rate, 3.0);
        assert_eq!(config.imu.period(), 0.01);
        assert_eq!(config.gps.period(), 0.1);
        assert_eq!(config.velocity.period(), 0.02);
        assert_eq!(config.imu.accel_bias_walk, None);
    }

    #[test]
    fn test_default_matrices() {
        let config = EstimatorConfig::default();
        let q = config.process_noise_matrix();
        assert_eq!(q.diag().to_vec(), vec![0.01, 0.01, 0.0025, 0.04, 0.04, 0.0025]);
        assert_eq!(q[[0, 1]], 0.0);

        let p0 = config.initial_covariance.to_matrix();
        assert_eq!(p0.diag().to_vec(), vec![1.0, 1.0, 0.1, 0.5, 0.5, 0.1]);
    }

    #[test]
    fn test_negative_noise_rejected() {
        let mut config = SimConfig::default();
        config.gps.noise_std = -0.3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { name: "gps.noise_std", .. })
        ));

        let mut config = SimConfig::default();
        config.estimator.process_noise[3] = -1e-3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { name: "estimator.process_noise", .. })
        ));
    }

    #[test]
    fn test_bad_probability_and_rate_rejected() {
        let mut config = SimConfig::default();
        config.gps.dropout_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));

        let mut config = SimConfig::default();
        config.imu.rate_hz = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name: "imu.rate_hz", .. })
        ));

        let mut config = SimConfig::default();
        config.velocity.noise_std = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { name: "velocity.noise_std", .. })
        ));
    }

    #[test]
    fn test_non_positive_definite_initial_covariance_rejected() {
        let mut config = SimConfig::default();
        config.estimator.initial_covariance = CovarianceSpec::Diagonal([1.0, 1.0, 0.0, 0.5, 0.5, 0.1]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositiveDefinite { .. })
        ));

        let mut full = vec![vec![0.0; STATE_DIM]; STATE_DIM];
        for (i, row) in full.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        full[0][1] = 2.0;
        full[1][0] = 2.0;
        config.estimator.initial_covariance = CovarianceSpec::Full(full);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn test_full_covariance_shape_checked() {
        let mut config = SimConfig::default();
        config.estimator.initial_covariance = CovarianceSpec::Full(vec![vec![1.0; 6]; 5]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DimensionMismatch { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn test_slip_table_checked() {
        let mut config = SimConfig::default();
        config.dynamics.slip.speed_breakpoints = vec![0.0, 2.0, 1.0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsortedBreakpoints { .. })
        ));

        let mut config = SimConfig::default();
        config.dynamics.slip.gains = vec![0.0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_json_covariance_forms() {
        let diag = SimConfig::from_json_str(
            r#"{ "estimator": { "initial_covariance": [2.0, 2.0, 0.1, 0.5, 0.5, 0.1] } }"#,
        )
        .unwrap();
        assert_eq!(diag.estimator.initial_covariance.to_matrix()[[0, 0]], 2.0);

        let full = SimConfig::from_json_str(
            r#"{ "estimator": { "initial_covariance": [
                [1.0, 0.1, 0.0, 0.0, 0.0, 0.0],
                [0.1, 1.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.1, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.5, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.5, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.1]
            ] } }"#,
        )
        .unwrap();
        assert_eq!(full.estimator.initial_covariance.to_matrix()[[1, 0]], 0.1);
    }

    #[test]
    fn test_json_enums_and_parse_errors() {
        let config = SimConfig::from_json_str(
            r#"{ "dynamics": { "integrator": "euler" }, "estimator": { "init": "configured" } }"#,
        )
        .unwrap();
        assert_eq!(config.dynamics.integrator, Integrator::Euler);
        assert_eq!(config.estimator.init, EstimatorInit::Configured);

        assert!(matches!(
            SimConfig::from_json_str("{ physics_dt: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let json = serde_json::to_string(&SimConfig::default()).unwrap();
        assert_eq!(SimConfig::from_json_str(&json).unwrap(), SimConfig::default());
    }
}
