//! Drone registry for one swarm.
//!
//! A swarm owns the drones flying in one arena, keyed by drone id. Adding a
//! drone connects it synchronously and replaces any earlier drone registered
//! under the same id. Drones whose radio link drops evict themselves through
//! a background task fed by their link-loss hooks.

use crate::config::DroneConfig;
use crate::driver::DriverFactory;
use crate::drone::{Drone, LostDrone};
use crate::error::FleetError;
use log::{info, warn};
use shared::{Arena, DroneStatus, LinkConfig};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};

type DroneMap = RwLock<HashMap<String, Arc<Drone>>>;

pub struct Swarm {
    id: String,
    arena: Arc<Arena>,
    factory: Arc<dyn DriverFactory>,
    config: DroneConfig,
    drones: Arc<DroneMap>,
    lost_tx: mpsc::UnboundedSender<LostDrone>,
}

impl Swarm {
    /// Creates an empty swarm and starts its eviction task. Must be called
    /// from within a tokio runtime.
    pub fn new(
        id: &str,
        arena: Arc<Arena>,
        factory: Arc<dyn DriverFactory>,
        config: DroneConfig,
    ) -> Self {
        let drones: Arc<DroneMap> = Arc::new(RwLock::new(HashMap::new()));
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_eviction(
            id.to_string(),
            Arc::downgrade(&drones),
            lost_rx,
        ));

        Self {
            id: id.to_string(),
            arena,
            factory,
            config,
            drones,
            lost_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn arena(&self) -> Arc<Arena> {
        Arc::clone(&self.arena)
    }

    /// Connects a new drone and registers it.
    ///
    /// Nothing is registered when the connection fails. On success the drone's
    /// high-level commander is enabled, its estimator reset, and any drone
    /// previously registered under `drone_id` is disconnected and replaced.
    pub async fn add_drone(
        &self,
        drone_id: &str,
        link: &LinkConfig,
    ) -> Result<Arc<Drone>, FleetError> {
        let driver = self.factory.create(drone_id);
        let drone = Arc::new(Drone::new(
            drone_id,
            link,
            Arc::clone(&self.arena),
            driver,
            self.config.clone(),
        ));

        // Installed before connecting so a loss during setup is never missed.
        drone.watch_link_loss(self.lost_tx.clone());

        if let Err(e) = drone.connect(true).await {
            warn!("Drone {} could not join swarm {}: {}", drone_id, self.id, e);
            drone.clear_link_loss_hook();
            return Err(e);
        }

        if let Err(e) = drone.enable_high_level_commander().await {
            warn!("Drone {} failed setup in swarm {}: {}", drone_id, self.id, e);
            release(&drone).await;
            return Err(e);
        }
        drone.reset_estimator().await;

        let previous = {
            let mut drones = self.drones.write().await;
            drones.insert(drone_id.to_string(), Arc::clone(&drone))
        };
        if let Some(previous) = previous {
            info!("Replacing drone {} in swarm {}", drone_id, self.id);
            release(&previous).await;
        }

        // A loss reported before the insert found nothing to evict.
        if !drone.is_connected().await {
            if let Some(lost) = remove_session(&self.drones, drone_id, drone.session()).await {
                release(&lost).await;
            }
            warn!("Drone {} lost its link while joining swarm {}", drone_id, self.id);
            return Err(FleetError::ConnectionFailed {
                uri: drone.link_uri().to_string(),
                reason: "link lost during setup".to_string(),
            });
        }

        info!(
            "Drone {} joined swarm {} on {}",
            drone_id,
            self.id,
            drone.link_uri()
        );
        Ok(drone)
    }

    /// Unregisters and disconnects a drone. Disconnect failures are logged and
    /// do not prevent the removal.
    pub async fn remove_drone(&self, drone_id: &str) -> Result<(), FleetError> {
        let removed = {
            let mut drones = self.drones.write().await;
            drones.remove(drone_id)
        };

        match removed {
            Some(drone) => {
                release(&drone).await;
                info!("Drone {} left swarm {}", drone_id, self.id);
                Ok(())
            }
            None => Err(FleetError::drone_not_found(drone_id)),
        }
    }

    pub async fn get_drone(&self, drone_id: &str) -> Option<Arc<Drone>> {
        self.drones.read().await.get(drone_id).cloned()
    }

    /// Status of every drone, ordered by id.
    pub async fn statuses(&self) -> Vec<DroneStatus> {
        let drones: Vec<Arc<Drone>> = self.drones.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(drones.len());
        for drone in drones {
            statuses.push(drone.get_status().await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Disconnects and removes every drone.
    pub async fn clear(&self) {
        let drones: Vec<Arc<Drone>> = {
            let mut drones = self.drones.write().await;
            drones.drain().map(|(_, drone)| drone).collect()
        };
        for drone in drones {
            release(&drone).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.drones.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.drones.read().await.is_empty()
    }
}

/// Best-effort teardown of a drone that is no longer registered.
async fn release(drone: &Drone) {
    drone.clear_link_loss_hook();
    if let Err(e) = drone.disconnect().await {
        warn!("Ignoring failed disconnect of drone {}: {}", drone.id(), e);
    }
}

/// Removes `drone_id` only if it is still the connection identified by `session`.
async fn remove_session(drones: &DroneMap, drone_id: &str, session: u64) -> Option<Arc<Drone>> {
    let mut drones = drones.write().await;
    match drones.get(drone_id) {
        Some(drone) if drone.session() == session => drones.remove(drone_id),
        _ => None,
    }
}

/// Removes drones whose link was lost. Only the connection that reported the
/// loss is evicted; a newer drone registered under the same id stays.
async fn run_eviction(
    swarm_id: String,
    drones: Weak<DroneMap>,
    mut lost_rx: mpsc::UnboundedReceiver<LostDrone>,
) {
    while let Some(lost) = lost_rx.recv().await {
        let Some(drones) = drones.upgrade() else {
            break;
        };

        if let Some(drone) = remove_session(&drones, &lost.drone_id, lost.session).await {
            warn!(
                "Drone {} lost its link and was removed from swarm {}",
                lost.drone_id, swarm_id
            );
            release(&drone).await;
        }
    }
}
