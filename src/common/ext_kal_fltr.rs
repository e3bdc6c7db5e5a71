use crate::common::linalg::{invert, symmetrize};
use log::warn;
use ndarray::{Array1, Array2};

/// Represents a sensor reading, including observed data, observation model, and covariance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Observed data associated with the sensor reading.
    pub data: Array1<f64>,
    /// Observation model matrix (H) for the sensor reading.
    pub obs_model: Array2<f64>,
    /// Covariance matrix (R) for the sensor reading.
    pub covar: Array2<f64>,
}

impl SensorReading {
    /// Creates a new `SensorReading` instance.
    ///
    /// # Arguments
    ///
    /// * `data` - Observed data, one entry per observation model row.
    /// * `obs_model` - Observation model matrix for the sensor reading.
    /// * `covar` - Square covariance matrix matching the observation rows.
    ///
    /// # Returns
    ///
    /// (`SensorReading`): A new `SensorReading` instance.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ndarray::{arr1, arr2};
    /// use drift_gym::common::ext_kal_fltr::SensorReading;
    ///
    /// let reading = SensorReading::new(
    ///     arr1(&[1.0, 2.0]),
    ///     arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
    ///     arr2(&[[0.1, 0.0], [0.0, 0.1]]),
    /// );
    /// assert_eq!(reading.dim(), 2);
    /// ```
    pub fn new(data: Array1<f64>, obs_model: Array2<f64>, covar: Array2<f64>) -> Self {
        let rows = obs_model.nrows();
        assert!(
            data.len() == rows && covar.shape() == [rows, rows],
            "Observation model and covariance matrix dimensions do not match"
        );
        SensorReading {
            data,
            obs_model,
            covar,
        }
    }

    /// Number of observed quantities.
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    /// `data − H·mean`, the raw innovation.
    pub fn innovation(&self, mean: &Array1<f64>) -> Array1<f64> {
        &self.data - &self.obs_model.dot(mean)
    }
}

/// A linear sensor that observes a subset of the state directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSensor {
    /// Observation model matrix for the simple sensor.
    pub obs_model: Array2<f64>,
    /// Covariance matrix for the simple sensor.
    pub covar: Array2<f64>,
}

impl SimpleSensor {
    /// Creates a new `SimpleSensor` instance.
    ///
    /// # Arguments
    ///
    /// * `observed` - State indices the sensor observes, in reading order.
    /// * `dims` - Dimension of the state vector.
    /// * `variances` - Noise variance of each observed quantity.
    ///
    /// # Returns
    ///
    /// (`SimpleSensor`): A sensor with `H` selecting `observed` and diagonal `R`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::common::ext_kal_fltr::SimpleSensor;
    ///
    /// let gyro = SimpleSensor::new(&[5], 6, &[0.01]);
    /// assert_eq!(gyro.obs_model.shape(), &[1, 6]);
    /// assert_eq!(gyro.obs_model[[0, 5]], 1.0);
    /// assert_eq!(gyro.covar[[0, 0]], 0.01);
    /// ```
    pub fn new(observed: &[usize], dims: usize, variances: &[f64]) -> Self {
        assert_eq!(
            observed.len(),
            variances.len(),
            "One variance is required per observed state"
        );
        let mut obs_model = Array2::zeros((observed.len(), dims));
        for (row, &idx) in observed.iter().enumerate() {
            obs_model[[row, idx]] = 1.0;
        }
        let covar = Array2::from_diag(&Array1::from(variances.to_vec()));
        SimpleSensor { obs_model, covar }
    }

    /// Wraps `data` into a `SensorReading` with this sensor's model.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ndarray::arr1;
    /// use drift_gym::common::ext_kal_fltr::SimpleSensor;
    ///
    /// let gps = SimpleSensor::new(&[0, 1], 6, &[0.09, 0.09]);
    /// let reading = gps.read(arr1(&[3.0, 4.0]));
    /// assert_eq!(reading.innovation(&arr1(&[1.0, 1.0, 0.0, 0.0, 0.0, 0.0])), arr1(&[2.0, 3.0]));
    /// ```
    pub fn read(&self, data: Array1<f64>) -> SensorReading {
        SensorReading::new(data, self.obs_model.clone(), self.covar.clone())
    }
}

/// Propagates a covariance through a linearized transition: `F·P·Fᵀ + Q`.
///
/// The result is symmetrized to cancel roundoff.
///
/// # Examples
///
/// ```rust
/// use ndarray::arr2;
/// use drift_gym::common::ext_kal_fltr::propagate_covariance;
///
/// let p = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
/// let f = arr2(&[[1.0, 0.1], [0.0, 1.0]]);
/// let q = arr2(&[[0.01, 0.0], [0.0, 0.01]]);
/// let next = propagate_covariance(&p, &f, &q);
/// assert!((next[[0, 0]] - 1.02).abs() < 1e-12);
/// assert!((next[[0, 1]] - 0.1).abs() < 1e-12);
/// ```
pub fn propagate_covariance(covar: &Array2<f64>, jacobian: &Array2<f64>, process_noise: &Array2<f64>) -> Array2<f64> {
    symmetrize(&(jacobian.dot(covar).dot(&jacobian.t()) + process_noise))
}

/// Result of a measurement update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Posterior mean, or the prior when the update was not applied.
    pub mean: Array1<f64>,
    /// Joseph-form posterior covariance, symmetrized with a non-negative
    /// diagonal.
    pub covar: Array2<f64>,
    /// Diagonal loading added to R to make the innovation covariance
    /// invertible; zero for a regular update.
    pub loading: f64,
    /// False when no loading made the innovation covariance invertible and
    /// the prior was returned unchanged.
    pub applied: bool,
}

impl UpdateOutcome {
    /// True when the update went through only after diagonal loading.
    pub fn regularized(&self) -> bool {
        self.applied && self.loading > 0.0
    }
}

/// Innovation covariance `H·P·Hᵀ + R` and its inverse, loading R's diagonal
/// with `epsilon·10^k` for `k = 0..max_attempts` when the plain matrix is
/// singular.
fn regularized_inverse(
    projected: &Array2<f64>,
    meas_covar: &Array2<f64>,
    epsilon: f64,
    max_attempts: u32,
) -> Option<(Array2<f64>, f64)> {
    let innovation_covar = projected + meas_covar;
    if let Some(inv) = invert(&innovation_covar) {
        return Some((inv, 0.0));
    }
    let eye = Array2::<f64>::eye(innovation_covar.nrows());
    (0..max_attempts).find_map(|k| {
        let loading = epsilon * 10f64.powi(k as i32);
        invert(&(&innovation_covar + &(&eye * loading))).map(|inv| (inv, loading))
    })
}

/// Applies one Kalman measurement update in Joseph form.
///
/// # Arguments
///
/// * `mean` - Prior state mean.
/// * `covar` - Prior state covariance.
/// * `reading` - Measurement with its observation model and noise covariance.
/// * `innovation` - `z − h(x)`, computed by the caller so angular components
///   can be wrapped.
/// * `epsilon` - First diagonal loading tried for a singular innovation covariance.
/// * `max_attempts` - Number of loadings tried, each ten times the last.
///
/// # Returns
///
/// (`UpdateOutcome`): The posterior, with the covariance computed as
/// `(I − KH)·P·(I − KH)ᵀ + K·R·Kᵀ`, symmetrized, its diagonal floored at zero.
///
/// # Examples
///
/// ```rust
/// use ndarray::{arr1, arr2};
/// use drift_gym::common::ext_kal_fltr::{kalman_update, SimpleSensor};
///
/// let sensor = SimpleSensor::new(&[0], 2, &[1.0]);
/// let reading = sensor.read(arr1(&[2.0]));
/// let mean = arr1(&[0.0, 0.0]);
/// let covar = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
///
/// let out = kalman_update(&mean, &covar, &reading, &reading.innovation(&mean), 1e-9, 6);
/// assert!((out.mean[0] - 1.0).abs() < 1e-12);
/// assert!((out.covar[[0, 0]] - 0.5).abs() < 1e-12);
/// assert_eq!(out.covar[[1, 1]], 1.0);
/// ```
pub fn kalman_update(
    mean: &Array1<f64>,
    covar: &Array2<f64>,
    reading: &SensorReading,
    innovation: &Array1<f64>,
    epsilon: f64,
    max_attempts: u32,
) -> UpdateOutcome {
    let h = &reading.obs_model;
    let ph_t = covar.dot(&h.t());
    let projected = h.dot(&ph_t);

    let Some((s_inv, loading)) = regularized_inverse(&projected, &reading.covar, epsilon, max_attempts) else {
        warn!(
            "innovation covariance singular after {max_attempts} regularization attempts; skipping update"
        );
        return UpdateOutcome {
            mean: mean.clone(),
            covar: covar.clone(),
            loading: 0.0,
            applied: false,
        };
    };
    if loading > 0.0 {
        warn!("innovation covariance regularized with diagonal loading {loading:e}");
    }

    let meas_covar = &reading.covar + &(Array2::<f64>::eye(reading.dim()) * loading);
    let gain = ph_t.dot(&s_inv);
    let posterior_mean = mean + &gain.dot(innovation);

    let i_kh = Array2::<f64>::eye(mean.len()) - gain.dot(h);
    let joseph = i_kh.dot(covar).dot(&i_kh.t()) + gain.dot(&meas_covar).dot(&gain.t());
    let mut posterior_covar = symmetrize(&joseph);
    posterior_covar.diag_mut().mapv_inplace(|v| v.max(0.0));

    UpdateOutcome {
        mean: posterior_mean,
        covar: posterior_covar,
        loading,
        applied: true,
    }
}

/// Represents a trait for Extended Kalman Filter (EKF) functionality.
///
/// Filters are immutable models; the estimate is a value passed in and
/// returned, so a filter can be shared and replayed freely.
pub trait EKF {
    /// Mean, covariance and bookkeeping carried between steps.
    type State;
    /// Known input applied over a predict step.
    type Control;
    /// Anything `correct` accepts.
    type Measurement;

    /// Propagates the mean through the process model and returns it with
    /// the model's Jacobian evaluated at the prior mean.
    fn calc_transfer_fun(&self, state: &Self::State, control: &Self::Control, dt: f64) -> (Array1<f64>, Array2<f64>);

    /// Predicts the state of the EKF `dt` seconds ahead.
    fn predict(&self, state: &Self::State, control: &Self::Control, dt: f64) -> Self::State;

    /// Corrects the state with a measurement.
    fn correct(&self, state: &Self::State, measurement: &Self::Measurement) -> Self::State;
}
