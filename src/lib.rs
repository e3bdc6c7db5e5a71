//! # drift-gym
//!
//! `drift-gym` is the simulation core of an F1/10-scale drifting testbed for reinforcement-learning research.
//! It integrates a kinematic bicycle model with actuator lag and a tire-slip approximation, simulates noisy
//! GPS, IMU and wheel-odometry sensors with drifting biases and dropout, and fuses their asynchronous measurements with a
//! six-state Extended Kalman Filter (EKF) that reports its uncertainty alongside the estimate.
//!
//! ## Modules
//!
//! - [config](common/config/index.html): Calibration constants and episode settings, loadable from JSON and
//!   validated once.
//!
//! - [ext_kal_fltr](common/ext_kal_fltr/index.html): Sensor readings, linear sensors, the Joseph-form
//!   measurement update and the [EKF Trait](common/ext_kal_fltr/trait.EKF.html).
//!
//! - [vehicle](simulator/vehicle/index.html): Vehicle state, commands and the dynamics integrator, with an
//!   optional pitch/roll extension.
//!
//! - [sensors](simulator/sensors/index.html): GPS, IMU and wheel-odometry measurement models driven by simulated time.
//!
//! - [estimator](simulator/estimator/index.html): The fused `[x, y, θ, vx, vy, ω]` estimator.
//!
//! - [episode](simulator/episode/index.html): Runs dynamics, sensors and the filter tick by tick from one
//!   seeded generator.
//!
//! ## Usage
//!
//! To use the `drift-gym` crate in your project, add the following line to your `Cargo.toml` file:
//!
//! ```toml
//! [dependencies]
//! drift-gym = "0.1.0"
//! ```
//!
//! ## Example
//!
//! ```rust
//! use drift_gym::common::config::SimConfig;
//! use drift_gym::simulator::episode::Episode;
//! use drift_gym::simulator::vehicle::ControlCommand;
//!
//! // Same seed, same episode.
//! let mut episode = Episode::reset(SimConfig::default(), 7).unwrap();
//!
//! let command = ControlCommand::physical(2.0, 0.5);
//! for _ in 0..100 {
//!     let report = episode.step(&command).unwrap();
//!     assert!(report.estimate.position_std.is_finite());
//! }
//!
//! let estimate = episode.estimator_state().summary();
//! let truth = episode.vehicle();
//! assert!((estimate.x - truth.x).hypot(estimate.y - truth.y) < 1.5);
//! ```
//!
//! ## License
//!
//! This project is licensed under the MIT License.

pub mod common;
pub mod simulator;
