//! In-process stand-in for the radio driver.
//!
//! A loopback link acknowledges itself, records every command it receives and
//! reports each commanded target straight back as a telemetry sample. It is
//! what the server runs against when no radio is attached, and what the test
//! suites use to script link failures.

use crate::driver::{DriverError, DriverEvent, DriverFactory, DroneDriver, LogBlock};
use log::debug;
use shared::Vector3;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// How a loopback link answers `open_link`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkBehavior {
    #[default]
    Accept,
    Refuse,
    /// Never answers, leaving a synchronous connect to its timeout.
    Silent,
}

/// Failure injected when a named operation reaches the driver. Operations are
/// keyed by parameter name for `set_value` and by method name otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The operation returns a driver fault.
    Reject,
    /// The link drops as the operation is sent.
    DropLink,
}

/// A command as it reached the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    SetValue(String, String),
    Takeoff { height: f64, duration: f64 },
    Land { height: f64, duration: f64 },
    GoTo {
        x: f64,
        y: f64,
        z: f64,
        yaw: f64,
        duration: f64,
        relative: bool,
    },
    Stop,
    Setpoint { thrust: u16 },
    StartLogging(usize),
    StopLogging,
    CloseLink,
}

#[derive(Debug, Default)]
struct LoopbackState {
    uri: Option<String>,
    events: Option<mpsc::UnboundedSender<DriverEvent>>,
    logging: bool,
    position: Vector3,
    yaw: f64,
    battery_voltage: f64,
    commands: Vec<DriverCommand>,
    faults: HashMap<String, Fault>,
}

#[derive(Debug)]
pub struct LoopbackDriver {
    behavior: LinkBehavior,
    state: Mutex<LoopbackState>,
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

impl LoopbackDriver {
    pub fn new(behavior: LinkBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(LoopbackState {
                battery_voltage: 4.0,
                ..LoopbackState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<DriverCommand> {
        self.lock().commands.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().events.is_some()
    }

    /// Moves the simulated airframe and reports the new position.
    pub fn set_position(&self, position: Vector3) {
        let mut state = self.lock();
        state.position = position;
        Self::report_position(&state);
    }

    pub fn set_battery_voltage(&self, voltage: f64) {
        let mut state = self.lock();
        state.battery_voltage = voltage;
        if state.logging {
            Self::emit(
                &state,
                DriverEvent::Battery {
                    timestamp: timestamp(),
                    voltage,
                },
            );
        }
    }

    /// Drops an established link the way a radio does when the drone goes
    /// out of range.
    pub fn lose_link(&self, message: &str) {
        Self::drop_link(&mut self.lock(), message);
    }

    pub fn inject_fault(&self, operation: &str, fault: Fault) {
        self.lock().faults.insert(operation.to_string(), fault);
    }

    fn drop_link(state: &mut LoopbackState, message: &str) {
        if let (Some(events), Some(uri)) = (state.events.take(), state.uri.clone()) {
            let _ = events.send(DriverEvent::ConnectionLost {
                uri,
                message: message.to_string(),
            });
        }
        state.logging = false;
    }

    fn check_fault(state: &mut LoopbackState, operation: &str) -> Result<(), DriverError> {
        match state.faults.get(operation).copied() {
            None => Ok(()),
            Some(Fault::Reject) => Err(DriverError::Fault(format!("{} rejected", operation))),
            Some(Fault::DropLink) => {
                Self::drop_link(state, "link dropped");
                Self::require_open(state)
            }
        }
    }

    fn emit(state: &LoopbackState, event: DriverEvent) {
        if let Some(events) = &state.events {
            // The receiving drone may already be gone.
            let _ = events.send(event);
        }
    }

    fn report_position(state: &LoopbackState) {
        if !state.logging {
            return;
        }
        let now = timestamp();
        Self::emit(
            state,
            DriverEvent::Position {
                timestamp: now,
                x: state.position.x,
                y: state.position.y,
                z: state.position.z,
            },
        );
        Self::emit(
            state,
            DriverEvent::Yaw {
                timestamp: now,
                yaw: state.yaw,
            },
        );
    }

    fn require_open(state: &LoopbackState) -> Result<(), DriverError> {
        if state.events.is_some() {
            Ok(())
        } else {
            Err(DriverError::LinkClosed(
                state.uri.clone().unwrap_or_else(|| "loopback".to_string()),
            ))
        }
    }
}

impl DroneDriver for LoopbackDriver {
    fn open_link(
        &self,
        uri: &str,
        events: mpsc::UnboundedSender<DriverEvent>,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.uri = Some(uri.to_string());
        debug!("Loopback link {} opening ({:?})", uri, self.behavior);

        match self.behavior {
            LinkBehavior::Accept => {
                let _ = events.send(DriverEvent::Connected {
                    uri: uri.to_string(),
                });
                state.events = Some(events);
            }
            LinkBehavior::Refuse => {
                let _ = events.send(DriverEvent::ConnectionFailed {
                    uri: uri.to_string(),
                    message: "no acknowledgement from radio".to_string(),
                });
            }
            LinkBehavior::Silent => {
                // Keep the sender so the drone's pump stays alive but idle.
                state.events = Some(events);
            }
        }
        Ok(())
    }

    fn close_link(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.commands.push(DriverCommand::CloseLink);
        state.logging = false;
        if let (Some(events), Some(uri)) = (state.events.take(), state.uri.clone()) {
            let _ = events.send(DriverEvent::Disconnected { uri });
        }
        Ok(())
    }

    fn set_value(&self, name: &str, value: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check_fault(&mut state, name)?;
        Self::require_open(&state)?;
        state
            .commands
            .push(DriverCommand::SetValue(name.to_string(), value.to_string()));
        Ok(())
    }

    fn takeoff(&self, height: f64, duration: f64) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::Takeoff { height, duration });
        state.position.z = height;
        Self::report_position(&state);
        Ok(())
    }

    fn land(&self, height: f64, duration: f64) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::Land { height, duration });
        state.position.z = height;
        Self::report_position(&state);
        Ok(())
    }

    fn go_to(
        &self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f64,
        duration: f64,
        relative: bool,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::GoTo {
            x,
            y,
            z,
            yaw,
            duration,
            relative,
        });
        if relative {
            state.position.x += x;
            state.position.y += y;
            state.position.z += z;
            state.yaw += yaw;
        } else {
            state.position = Vector3::new(x, y, z);
            state.yaw = yaw;
        }
        Self::report_position(&state);
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::Stop);
        Ok(())
    }

    fn send_setpoint(
        &self,
        _roll: f64,
        _pitch: f64,
        _yaw_rate: f64,
        thrust: u16,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check_fault(&mut state, "send_setpoint")?;
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::Setpoint { thrust });
        Ok(())
    }

    fn start_logging(&self, blocks: &[LogBlock]) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::require_open(&state)?;
        state.commands.push(DriverCommand::StartLogging(blocks.len()));
        state.logging = true;

        Self::emit(
            &state,
            DriverEvent::Variance {
                timestamp: timestamp(),
                x: 0.001,
                y: 0.001,
                z: 0.001,
            },
        );
        Self::emit(
            &state,
            DriverEvent::Battery {
                timestamp: timestamp(),
                voltage: state.battery_voltage,
            },
        );
        Self::report_position(&state);
        Ok(())
    }

    fn stop_logging(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        Self::check_fault(&mut state, "stop_logging")?;
        state.commands.push(DriverCommand::StopLogging);
        state.logging = false;
        Ok(())
    }
}

/// Hands out loopback drivers and keeps a handle on the latest one per drone
/// so callers can steer the simulated airframe.
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    default_behavior: LinkBehavior,
    overrides: Mutex<HashMap<String, LinkBehavior>>,
    faults: Mutex<HashMap<String, Vec<(String, Fault)>>>,
    drivers: Mutex<HashMap<String, Arc<LoopbackDriver>>>,
}

impl LoopbackFactory {
    pub fn new(default_behavior: LinkBehavior) -> Self {
        Self {
            default_behavior,
            ..Self::default()
        }
    }

    /// Overrides the link behaviour for one drone id.
    pub fn set_behavior(&self, drone_id: &str, behavior: LinkBehavior) {
        self.overrides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(drone_id.to_string(), behavior);
    }

    /// Injects `fault` into every driver created for `drone_id` from now on.
    pub fn set_fault(&self, drone_id: &str, operation: &str, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(drone_id.to_string())
            .or_default()
            .push((operation.to_string(), fault));
    }

    /// The most recently created driver for `drone_id`.
    pub fn driver(&self, drone_id: &str) -> Option<Arc<LoopbackDriver>> {
        self.drivers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(drone_id)
            .cloned()
    }
}

impl DriverFactory for LoopbackFactory {
    fn create(&self, drone_id: &str) -> Arc<dyn DroneDriver> {
        let behavior = self
            .overrides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(drone_id)
            .copied()
            .unwrap_or(self.default_behavior);

        let driver = Arc::new(LoopbackDriver::new(behavior));
        if let Some(faults) = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(drone_id)
        {
            for (operation, fault) in faults {
                driver.inject_fault(operation, *fault);
            }
        }
        self.drivers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(drone_id.to_string(), Arc::clone(&driver));
        driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LOG_BLOCKS;

    #[test]
    fn test_accepting_link_reports_connected() {
        let driver = LoopbackDriver::new(LinkBehavior::Accept);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.open_link("radio://0/80/2M/E7E7E7E7E7", tx).unwrap();

        assert!(driver.is_open());
        assert_eq!(
            rx.try_recv().unwrap(),
            DriverEvent::Connected {
                uri: "radio://0/80/2M/E7E7E7E7E7".to_string()
            }
        );
    }

    #[test]
    fn test_refusing_link_reports_failure() {
        let driver = LoopbackDriver::new(LinkBehavior::Refuse);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.open_link("radio://0/80/2M/E7E7E7E7E7", tx).unwrap();

        assert!(!driver.is_open());
        match rx.try_recv().unwrap() {
            DriverEvent::ConnectionFailed { .. } => {}
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(driver.takeoff(0.5, 1.0).is_err());
    }

    #[test]
    fn test_go_to_echoes_position_while_logging() {
        let driver = LoopbackDriver::new(LinkBehavior::Accept);
        let (tx, mut rx) = mpsc::unbounded_channel();
        driver.open_link("loop", tx).unwrap();
        driver.start_logging(&LOG_BLOCKS).unwrap();
        while rx.try_recv().is_ok() {}

        driver.go_to(2.5, 1.5, 0.8, 0.0, 2.0, false).unwrap();

        match rx.try_recv().unwrap() {
            DriverEvent::Position { x, y, z, .. } => {
                assert_eq!((x, y, z), (2.5, 1.5, 0.8));
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(driver.commands().contains(&DriverCommand::GoTo {
            x: 2.5,
            y: 1.5,
            z: 0.8,
            yaw: 0.0,
            duration: 2.0,
            relative: false,
        }));
    }

    #[test]
    fn test_lose_link_closes_channel() {
        let driver = LoopbackDriver::new(LinkBehavior::Accept);
        let (tx, mut rx) = mpsc::unbounded_channel();
        driver.open_link("loop", tx).unwrap();
        let _ = rx.try_recv();

        driver.lose_link("out of range");

        assert!(!driver.is_open());
        match rx.try_recv().unwrap() {
            DriverEvent::ConnectionLost { message, .. } => assert_eq!(message, "out of range"),
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_injected_faults() {
        let driver = LoopbackDriver::new(LinkBehavior::Accept);
        let (tx, mut rx) = mpsc::unbounded_channel();
        driver.open_link("loop", tx).unwrap();
        let _ = rx.try_recv();
        driver.inject_fault("stop_logging", Fault::Reject);
        driver.inject_fault("kalman.resetEstimation", Fault::DropLink);

        assert!(matches!(driver.stop_logging(), Err(DriverError::Fault(_))));
        assert!(driver.is_open());

        assert!(matches!(
            driver.set_value("kalman.resetEstimation", "1"),
            Err(DriverError::LinkClosed(_))
        ));
        assert!(!driver.is_open());
        match rx.try_recv().unwrap() {
            DriverEvent::ConnectionLost { .. } => {}
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_factory_overrides_behavior() {
        let factory = LoopbackFactory::new(LinkBehavior::Accept);
        factory.set_behavior("d2", LinkBehavior::Silent);

        let _ = factory.create("d1");
        let _ = factory.create("d2");

        assert_eq!(factory.driver("d1").unwrap().behavior, LinkBehavior::Accept);
        assert_eq!(factory.driver("d2").unwrap().behavior, LinkBehavior::Silent);
        assert!(factory.driver("d3").is_none());
    }
}
