//! Runtime configuration shared by the server library and binary.

use shared::{MAX_VELOCITY, MAX_YAW_ROTATIONS, MIN_DURATION};
use std::path::PathBuf;
use std::time::Duration;

/// Motion limits and link timings applied to every drone.
#[derive(Debug, Clone)]
pub struct DroneConfig {
    pub max_velocity: f64,
    pub min_duration: f64,
    pub max_yaw_rotations: f64,
    /// Upper bound for a synchronous connect.
    pub connect_timeout: Duration,
    /// Pause after writing a firmware parameter.
    pub param_delay: Duration,
    /// How long `kalman.resetEstimation` is held high.
    pub reset_pulse: Duration,
    /// Time the estimator gets to reconverge after a reset.
    pub reset_settle: Duration,
    /// Lets the zero setpoint leave the radio before the link is closed.
    pub shutdown_flush: Duration,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            max_velocity: MAX_VELOCITY,
            min_duration: MIN_DURATION,
            max_yaw_rotations: MAX_YAW_ROTATIONS,
            connect_timeout: Duration::from_secs(10),
            param_delay: Duration::from_millis(100),
            reset_pulse: Duration::from_millis(100),
            reset_settle: Duration::from_secs(2),
            shutdown_flush: Duration::from_millis(100),
        }
    }
}

impl DroneConfig {
    /// Same limits, no settle delays. Used with the loopback driver.
    pub fn without_delays(self) -> Self {
        Self {
            param_delay: Duration::ZERO,
            reset_pulse: Duration::ZERO,
            reset_settle: Duration::ZERO,
            shutdown_flush: Duration::ZERO,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory receiving `<swarm_id>_results.txt`.
    pub results_dir: PathBuf,
    pub drone: DroneConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            results_dir: PathBuf::from("."),
            drone: DroneConfig::default(),
        }
    }
}
