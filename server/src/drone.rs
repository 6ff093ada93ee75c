//! A single drone: its radio link, live telemetry and sanitized motion commands.
//!
//! Every drone owns one driver connection. Link lifecycle signals and
//! telemetry samples are pushed by the driver onto a per-drone channel and
//! applied by a dedicated pump task, so command methods and telemetry never
//! race on individual fields:
//! - telemetry samples overwrite position, yaw, variance and battery voltage
//! - command methods only change the flight state
//! - a lost link marks the drone offline and notifies the owning swarm
//!
//! Motion targets are given in arena-local coordinates, clamped into the arena
//! box and translated into the driver's frame before they are sent.

use crate::config::DroneConfig;
use crate::driver::{DriverEvent, DroneDriver, LOG_BLOCKS};
use crate::error::FleetError;
use log::{debug, info, warn};
use shared::{
    battery_percentage, normalize_yaw, Arena, DroneState, DroneStatus, GoToResult, LinkConfig,
    TakeoffLandResult, Vector3,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{sleep, timeout};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Progress of the radio link as seen by the event pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Connecting,
    Connected,
    Failed(String),
    Lost(String),
}

/// Notification sent to the owning swarm when a drone's link drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostDrone {
    pub drone_id: String,
    pub session: u64,
}

/// Live values written by the event pump (telemetry) and by commands (state).
#[derive(Debug, Clone, Default)]
struct Telemetry {
    position: Vector3,
    yaw: f64,
    variance: Vector3,
    battery_voltage: f64,
    is_connected: bool,
    state: DroneState,
}

type LossHook = Arc<Mutex<Option<mpsc::UnboundedSender<LostDrone>>>>;

pub struct Drone {
    id: String,
    link_uri: String,
    /// Distinguishes this connection from a later one under the same id.
    session: u64,
    arena: Arc<Arena>,
    config: DroneConfig,
    driver: Arc<dyn DroneDriver>,
    telemetry: Arc<RwLock<Telemetry>>,
    link: Arc<watch::Sender<LinkState>>,
    loss_hook: LossHook,
}

/// Clamps a velocity into `(0, max_velocity]`. Non-positive and NaN requests
/// fall back to the maximum.
pub fn sanitize_velocity(velocity: f64, max_velocity: f64) -> f64 {
    if velocity > 0.0 {
        velocity.min(max_velocity)
    } else {
        max_velocity
    }
}

/// Time needed to cover `distance`, never shorter than `min_duration`.
pub fn convert_velocity_to_time(distance: f64, velocity: f64, config: &DroneConfig) -> f64 {
    let duration = distance / sanitize_velocity(velocity, config.max_velocity);
    duration.max(config.min_duration)
}

fn clamp_into_arena(target: Vector3, arena: &Arena) -> Vector3 {
    Vector3::new(
        target.x.clamp(arena.min_x, arena.max_x),
        target.y.clamp(arena.min_y, arena.max_y),
        target.z.clamp(arena.min_z, arena.max_z),
    )
}

impl Drone {
    pub fn new(
        id: &str,
        link: &LinkConfig,
        arena: Arc<Arena>,
        driver: Arc<dyn DroneDriver>,
        config: DroneConfig,
    ) -> Self {
        let (link_tx, _) = watch::channel(LinkState::Closed);
        Self {
            id: id.to_string(),
            link_uri: link.uri(),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            arena,
            config,
            driver,
            telemetry: Arc::new(RwLock::new(Telemetry::default())),
            link: Arc::new(link_tx),
            loss_hook: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link_uri(&self) -> &str {
        &self.link_uri
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub async fn is_connected(&self) -> bool {
        self.telemetry.read().await.is_connected
    }

    pub async fn state(&self) -> DroneState {
        self.telemetry.read().await.state
    }

    pub fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }

    /// Installs the channel notified when this drone's link is lost.
    pub fn watch_link_loss(&self, hook: mpsc::UnboundedSender<LostDrone>) {
        *self
            .loss_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hook);
    }

    pub fn clear_link_loss_hook(&self) {
        self.loss_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Opens the radio link.
    ///
    /// With `synchronous` set, waits until the driver reports success or
    /// failure, bounded by `connect_timeout`. A refused or silent link yields
    /// `ConnectionFailed` and leaves the drone offline.
    pub async fn connect(&self, synchronous: bool) -> Result<(), FleetError> {
        info!("Connecting to {}", self.link_uri);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = EventPump {
            drone_id: self.id.clone(),
            session: self.session,
            driver: Arc::clone(&self.driver),
            telemetry: Arc::clone(&self.telemetry),
            link: Arc::clone(&self.link),
            loss_hook: Arc::clone(&self.loss_hook),
            param_delay: self.config.param_delay,
        };
        tokio::spawn(pump.run(events_rx));

        let mut link_rx = self.link.subscribe();
        self.link.send_replace(LinkState::Connecting);

        if let Err(e) = self.driver.open_link(&self.link_uri, events_tx) {
            self.link.send_replace(LinkState::Closed);
            return Err(e.into());
        }

        if !synchronous {
            return Ok(());
        }

        let outcome = timeout(self.config.connect_timeout, async {
            link_rx
                .wait_for(|state| *state != LinkState::Connecting)
                .await
                .map(|state| state.clone())
        })
        .await;

        match outcome {
            Ok(Ok(LinkState::Connected)) => Ok(()),
            Ok(Ok(LinkState::Failed(reason))) | Ok(Ok(LinkState::Lost(reason))) => {
                Err(self.connection_failed(reason))
            }
            Ok(Ok(_)) => Err(self.connection_failed("link closed while connecting".to_string())),
            Ok(Err(_)) => Err(self.connection_failed("link state dropped".to_string())),
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    self.link_uri, self.config.connect_timeout
                );
                if let Err(e) = self.driver.close_link() {
                    debug!("Closing timed out link {} failed: {}", self.link_uri, e);
                }
                Err(self.connection_failed("timed out".to_string()))
            }
        }
    }

    fn connection_failed(&self, reason: String) -> FleetError {
        FleetError::ConnectionFailed {
            uri: self.link_uri.clone(),
            reason,
        }
    }

    /// Stops telemetry, releases the thrust lock and closes the link.
    /// Does nothing for a drone that is not connected.
    ///
    /// Every step runs even if an earlier one fails, and the drone always ends
    /// up offline. The first failure is returned.
    pub async fn disconnect(&self) -> Result<(), FleetError> {
        if !self.is_connected().await {
            return Ok(());
        }

        info!("Disconnecting from {}", self.link_uri);
        let mut first_error = None;
        if let Err(e) = self.driver.stop_logging() {
            warn!("Stopping telemetry on {} failed: {}", self.link_uri, e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.driver.send_setpoint(0.0, 0.0, 0.0, 0) {
            warn!("Zero setpoint on {} failed: {}", self.link_uri, e);
            first_error.get_or_insert(e);
        }
        // The radio queue is not flushed on close.
        sleep(self.config.shutdown_flush).await;
        if let Err(e) = self.driver.close_link() {
            warn!("Closing {} failed: {}", self.link_uri, e);
            first_error.get_or_insert(e);
        }

        {
            let mut telemetry = self.telemetry.write().await;
            telemetry.is_connected = false;
            telemetry.state = DroneState::Offline;
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn enable_high_level_commander(&self) -> Result<(), FleetError> {
        self.driver.set_value("commander.enHighLevel", "1")?;
        sleep(self.config.param_delay).await;
        Ok(())
    }

    /// Pulses the estimator reset and waits for it to settle.
    ///
    /// Convergence is not verified; driver errors are only logged.
    pub async fn reset_estimator(&self) {
        if let Err(e) = self.driver.set_value("kalman.resetEstimation", "1") {
            warn!("Estimator reset on {} failed: {}", self.id, e);
        }
        sleep(self.config.reset_pulse).await;
        if let Err(e) = self.driver.set_value("kalman.resetEstimation", "0") {
            warn!("Estimator reset on {} failed: {}", self.id, e);
        }
        // TODO: poll kalman variance until it drops below a threshold instead of a fixed settle time
        sleep(self.config.reset_settle).await;
    }

    pub async fn takeoff(
        &self,
        absolute_height: f64,
        velocity: f64,
    ) -> Result<TakeoffLandResult, FleetError> {
        let target_z = absolute_height.clamp(self.arena.min_z, self.arena.max_z);
        self.reset_estimator().await;
        let duration = convert_velocity_to_time(target_z, velocity, &self.config);

        self.driver.takeoff(target_z, duration)?;
        self.set_state(DroneState::Starting).await;
        debug!("Drone {} taking off to {:.2} in {:.2}s", self.id, target_z, duration);

        Ok(TakeoffLandResult { duration, target_z })
    }

    pub async fn land(
        &self,
        absolute_height: f64,
        velocity: f64,
    ) -> Result<TakeoffLandResult, FleetError> {
        let target_z = absolute_height.clamp(self.arena.min_z, self.arena.max_z);
        let duration = convert_velocity_to_time(target_z, velocity, &self.config);

        self.driver.land(target_z, duration)?;
        self.set_state(DroneState::Landing).await;
        debug!("Drone {} landing to {:.2} in {:.2}s", self.id, target_z, duration);

        Ok(TakeoffLandResult { duration, target_z })
    }

    /// Flies to an arena-local target, or by an offset from the current
    /// position when `relative` is set.
    ///
    /// The target is clamped into the arena before `x`/`y` are translated into
    /// the driver frame, so the driver always receives an absolute setpoint.
    pub async fn go_to(
        &self,
        x: f64,
        y: f64,
        z: f64,
        yaw: f64,
        velocity: f64,
        relative: bool,
    ) -> Result<GoToResult, FleetError> {
        let position = self.telemetry.read().await.position;

        let requested = if relative {
            Vector3::new(
                self.arena.transform_x_inverse(position.x) + x,
                self.arena.transform_y_inverse(position.y) + y,
                position.z + z,
            )
        } else {
            Vector3::new(x, y, z)
        };
        let clamped = clamp_into_arena(requested, &self.arena);
        let target = Vector3::new(
            self.arena.transform_x(clamped.x),
            self.arena.transform_y(clamped.y),
            clamped.z,
        );
        let target_yaw = normalize_yaw(yaw, self.config.max_yaw_rotations);

        let reference = if relative {
            Vector3::default()
        } else {
            position
        };
        let distance = reference.distance(&target);
        let duration = convert_velocity_to_time(distance, velocity, &self.config);

        self.driver
            .go_to(target.x, target.y, target.z, target_yaw, duration, false)?;
        self.set_state(DroneState::Navigating).await;

        Ok(GoToResult {
            duration,
            target_x: target.x,
            target_y: target.y,
            target_z: target.z,
            target_yaw,
            relative,
        })
    }

    pub async fn stop(&self) -> Result<(), FleetError> {
        self.driver.stop()?;
        self.set_state(DroneState::Idle).await;
        Ok(())
    }

    pub async fn get_status(&self) -> DroneStatus {
        let telemetry = self.telemetry.read().await;
        DroneStatus {
            id: self.id.clone(),
            var_x: telemetry.variance.x,
            var_y: telemetry.variance.y,
            var_z: telemetry.variance.z,
            x: self.arena.transform_x_inverse(telemetry.position.x),
            y: self.arena.transform_y_inverse(telemetry.position.y),
            z: telemetry.position.z,
            yaw: telemetry.yaw,
            status: telemetry.state,
            is_connected: telemetry.is_connected,
            battery_voltage: telemetry.battery_voltage,
            battery_percentage: battery_percentage(telemetry.battery_voltage),
        }
    }

    /// Position in the flight-room frame the driver reports in.
    pub async fn flight_position(&self) -> Vector3 {
        self.telemetry.read().await.position
    }

    async fn set_state(&self, state: DroneState) {
        self.telemetry.write().await.state = state;
    }
}

/// Applies driver events to one drone's shared state, in arrival order.
struct EventPump {
    drone_id: String,
    session: u64,
    driver: Arc<dyn DroneDriver>,
    telemetry: Arc<RwLock<Telemetry>>,
    link: Arc<watch::Sender<LinkState>>,
    loss_hook: LossHook,
    param_delay: Duration,
}

impl EventPump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                DriverEvent::Connected { uri } => {
                    info!("Connected to {}", uri);
                    // Position comes from the external tracking system, not the flow deck.
                    if let Err(e) = self.driver.set_value("motion.disable", "1") {
                        warn!("Could not disable motion tracking on {}: {}", uri, e);
                    }
                    sleep(self.param_delay).await;
                    if let Err(e) = self.driver.start_logging(&LOG_BLOCKS) {
                        warn!("Could not start telemetry on {}: {}", uri, e);
                    }
                    {
                        let mut telemetry = self.telemetry.write().await;
                        telemetry.is_connected = true;
                        telemetry.state = DroneState::Idle;
                    }
                    self.link.send_replace(LinkState::Connected);
                }
                DriverEvent::ConnectionFailed { uri, message } => {
                    warn!("Connection to {} failed: {}", uri, message);
                    self.link.send_replace(LinkState::Failed(message));
                }
                DriverEvent::Disconnected { uri } => {
                    info!("Disconnected from {}", uri);
                    self.mark_offline().await;
                    self.link.send_replace(LinkState::Closed);
                }
                DriverEvent::ConnectionLost { uri, message } => {
                    warn!("Connection to {} lost: {}", uri, message);
                    self.mark_offline().await;
                    self.link.send_replace(LinkState::Lost(message));
                    self.notify_loss();
                }
                DriverEvent::Variance { x, y, z, .. } => {
                    self.telemetry.write().await.variance = Vector3::new(x, y, z);
                }
                DriverEvent::Position { x, y, z, .. } => {
                    self.telemetry.write().await.position = Vector3::new(x, y, z);
                }
                DriverEvent::Yaw { yaw, .. } => {
                    self.telemetry.write().await.yaw = yaw;
                }
                DriverEvent::Battery { voltage, .. } => {
                    self.telemetry.write().await.battery_voltage = voltage;
                }
                DriverEvent::LogError { block, message } => {
                    warn!(
                        "Error when logging {} on {}: {}",
                        block, self.drone_id, message
                    );
                }
            }
        }
        debug!(
            "Event pump for drone {} (session {}) finished",
            self.drone_id, self.session
        );
    }

    async fn mark_offline(&self) {
        let mut telemetry = self.telemetry.write().await;
        telemetry.is_connected = false;
        telemetry.state = DroneState::Offline;
    }

    fn notify_loss(&self) {
        let hook = self
            .loss_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(hook) = hook {
            let _ = hook.send(LostDrone {
                drone_id: self.drone_id.clone(),
                session: self.session,
            });
        }
    }
}
