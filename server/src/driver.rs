//! Seam towards the radio driver that talks to the physical drones.
//!
//! The server never speaks the radio protocol itself. Each [`Drone`](crate::drone::Drone)
//! owns one [`DroneDriver`] and hands it an event channel when the link is
//! opened; link lifecycle signals and telemetry samples come back as
//! [`DriverEvent`]s on that channel, from whatever I/O context the driver runs in.
//!
//! Commands are fire-and-forget submissions: a driver returns as soon as the
//! command is queued for the radio.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("link {0} is not open")]
    LinkClosed(String),
    #[error("driver fault: {0}")]
    Fault(String),
}

/// One telemetry log block subscribed after the link comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBlock {
    pub name: &'static str,
    pub period: Duration,
    pub variables: &'static [&'static str],
}

pub const VARIANCE_LOG: LogBlock = LogBlock {
    name: "DroneLog_1",
    period: Duration::from_millis(500),
    variables: &["kalman.varPX", "kalman.varPY", "kalman.varPZ", "pm.vbat"],
};

pub const POSITION_LOG: LogBlock = LogBlock {
    name: "DroneLog_2",
    period: Duration::from_millis(500),
    variables: &[
        "kalman.stateX",
        "kalman.stateY",
        "kalman.stateZ",
        "stabilizer.yaw",
    ],
};

pub const LOG_BLOCKS: [LogBlock; 2] = [VARIANCE_LOG, POSITION_LOG];

/// Signals pushed by a driver onto a drone's event channel.
///
/// Telemetry samples carry the driver's timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Connected { uri: String },
    ConnectionFailed { uri: String, message: String },
    Disconnected { uri: String },
    ConnectionLost { uri: String, message: String },
    Variance { timestamp: u64, x: f64, y: f64, z: f64 },
    Position { timestamp: u64, x: f64, y: f64, z: f64 },
    Yaw { timestamp: u64, yaw: f64 },
    Battery { timestamp: u64, voltage: f64 },
    LogError { block: String, message: String },
}

pub trait DroneDriver: Send + Sync {
    /// Starts opening the link. The outcome arrives later as
    /// `Connected` or `ConnectionFailed` on `events`.
    fn open_link(
        &self,
        uri: &str,
        events: mpsc::UnboundedSender<DriverEvent>,
    ) -> Result<(), DriverError>;

    fn close_link(&self) -> Result<(), DriverError>;

    fn set_value(&self, name: &str, value: &str) -> Result<(), DriverError>;

    fn takeoff(&self, height: f64, duration: f64) -> Result<(), DriverError>;

    fn land(&self, height: f64, duration: f64) -> Result<(), DriverError>;

    fn go_to(
        &self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f64,
        duration: f64,
        relative: bool,
    ) -> Result<(), DriverError>;

    fn stop(&self) -> Result<(), DriverError>;

    /// Low-level attitude setpoint. All zeros releases the thrust lock.
    fn send_setpoint(
        &self,
        roll: f64,
        pitch: f64,
        yaw_rate: f64,
        thrust: u16,
    ) -> Result<(), DriverError>;

    fn start_logging(&self, blocks: &[LogBlock]) -> Result<(), DriverError>;

    fn stop_logging(&self) -> Result<(), DriverError>;
}

/// Builds one driver per drone connection.
pub trait DriverFactory: Send + Sync {
    fn create(&self, drone_id: &str) -> Arc<dyn DroneDriver>;
}
