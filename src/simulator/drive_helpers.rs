use crate::common::config::SlipConfig;
use interp::interp;
use std::f64::consts::PI;

/// Applies rate limiting to a new value based on the last value, down step, and up step.
///
/// # Arguments
///
/// * `new_value` - The new value to be rate-limited.
/// * `last_value` - The last value before rate limiting.
/// * `dw_step` - The downward step for rate limiting.
/// * `up_step` - The upward step for rate limiting.
///
/// # Returns
///
/// The rate-limited value.
///
/// # Examples
///
/// ```rust
/// use drift_gym::simulator::drive_helpers::rate_limit;
///
/// let new_value = rate_limit(1.5, 1.0, -0.1, 0.2);
/// assert_eq!(new_value, 1.2);
/// ```
pub fn rate_limit(new_value: f64, last_value: f64, dw_step: f64, up_step: f64) -> f64 {
    new_value
        .max(last_value + dw_step)
        .min(last_value + up_step)
}

/// Clips `value` to `[-limit, limit]`, letting NaN through unchanged.
///
/// # Panics
///
/// Panics if `limit` is negative or NaN, as [`f64::clamp`] does. Limits read
/// from a validated [`SimConfig`](crate::common::config::SimConfig) are
/// always non-negative.
///
/// # Examples
///
/// ```rust
/// use drift_gym::simulator::drive_helpers::clip_symmetric;
///
/// assert_eq!(clip_symmetric(5.0, 4.0), 4.0);
/// assert_eq!(clip_symmetric(-0.5, 4.0), -0.5);
/// assert!(clip_symmetric(f64::NAN, 4.0).is_nan());
/// ```
pub fn clip_symmetric(value: f64, limit: f64) -> f64 {
    value.clamp(-limit, limit)
}

/// Wraps an angle into `[-π, π)`.
///
/// # Examples
///
/// ```rust
/// use drift_gym::simulator::drive_helpers::wrap_angle;
/// use std::f64::consts::PI;
///
/// assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
/// assert_eq!(wrap_angle(0.25), 0.25);
/// ```
pub fn wrap_angle(angle: f64) -> f64 {
    if (-PI..PI).contains(&angle) {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid can round up to the modulus itself.
    if wrapped >= PI {
        -PI
    } else {
        wrapped
    }
}

/// Looks up the tire slip gain (seconds) for a longitudinal speed.
///
/// The speed is clamped to the table's breakpoint range, so the gain is held
/// constant outside it rather than extrapolated.
///
/// # Arguments
///
/// * `speed` - Absolute longitudinal speed in m/s.
/// * `slip` - Slip table.
///
/// # Returns
///
/// The interpolated slip gain.
///
/// # Examples
///
/// ```rust
/// use drift_gym::common::config::SlipConfig;
/// use drift_gym::simulator::drive_helpers::slip_gain;
///
/// let slip = SlipConfig::default();
/// assert_eq!(slip_gain(1.0, &slip), 0.0);
/// assert!((slip_gain(4.0, &slip) - 0.08).abs() < 1e-12);
/// assert!((slip_gain(10.0, &slip) - 0.08).abs() < 1e-12);
/// ```
pub fn slip_gain(speed: f64, slip: &SlipConfig) -> f64 {
    let (Some(&lo), Some(&hi)) = (slip.speed_breakpoints.first(), slip.speed_breakpoints.last())
    else {
        return 0.0;
    };
    let clamped = speed.abs().max(lo).min(hi);
    interp(&slip.speed_breakpoints, &slip.gains, clamped)
}

/// Lateral velocity the tires settle to while yawing at `omega` with
/// forward speed `vx`.
///
/// Positive yaw rate at positive speed pushes the body outward, to negative
/// lateral velocity.
pub fn lateral_slip_target(vx: f64, omega: f64, slip: &SlipConfig) -> f64 {
    if !slip.enabled {
        return 0.0;
    }
    -slip_gain(vx, slip) * vx * omega
}
