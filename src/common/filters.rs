/// Represents a first-order lag for discrete time signals.
///
/// Used to emulate actuator response: the commanded value is not reached
/// instantly but approached exponentially with time constant `tau`. The
/// filter holds no signal state, the caller threads the previous output
/// through [`FirstOrderLag::apply`].
///
/// # Examples
///
/// ```rust
/// use drift_gym::common::filters::FirstOrderLag;
///
/// let tau = 0.1; // Time constant in seconds
/// let dt = 0.02; // Time step in seconds
/// let lag = FirstOrderLag::new(tau, dt);
///
/// let speed = lag.apply(0.0, 1.0);
/// assert!(speed > 0.0 && speed < 1.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FirstOrderLag {
    /// Filter constant
    kf: f64,
}

impl FirstOrderLag {
    /// Creates a new `FirstOrderLag` instance.
    ///
    /// # Arguments
    ///
    /// * `tau` - Time constant in seconds. Zero gives ideal tracking.
    /// * `dt` - Time step in seconds.
    ///
    /// # Returns
    ///
    /// A new `FirstOrderLag` instance.
    pub fn new(tau: f64, dt: f64) -> Self {
        let kf = if tau <= 0.0 { 1.0 } else { dt / (tau + dt) };
        Self { kf }
    }

    /// Returns the filter constant `dt / (tau + dt)`.
    pub fn gain(&self) -> f64 {
        self.kf
    }

    /// Moves `current` one step toward `target`.
    ///
    /// # Arguments
    ///
    /// * `current` - Output of the previous step.
    /// * `target` - Commanded value.
    ///
    /// # Returns
    ///
    /// The filtered output for this step.
    pub fn apply(&self, current: f64, target: f64) -> f64 {
        (1.0 - self.kf) * current + self.kf * target
    }

    /// Derivative of [`FirstOrderLag::apply`] with respect to `current`.
    pub fn state_sensitivity(&self) -> f64 {
        1.0 - self.kf
    }
}
