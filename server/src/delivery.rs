//! Per-swarm delivery bookkeeping.
//!
//! A [`DeliveryLedger`] tracks the packages handed out to one swarm, how much
//! weight each drone is carrying, and the delivery and capacity-rejection
//! counters. Every operation runs under the ledger's single lock, so pickups
//! and deliveries within a swarm are serialized while separate swarms proceed
//! independently.
//!
//! Invariant kept after every operation: for each drone, its carry load equals
//! the summed weight of the pending packages assigned to it.

use crate::error::FleetError;
use log::{debug, error, info};
use shared::{
    DeliverySummary, Package, Vector3, MAX_CARRY_WEIGHT, MAX_PENDING_PACKAGES, PICKUP_ZONE,
    ZONE_ALTITUDE, ZONE_RADIUS,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct LedgerState {
    pending: HashMap<String, Package>,
    carry_load: HashMap<String, f64>,
    delivered: u32,
    capacity_rejections: u32,
}

/// True when `position` hovers low enough inside the circle around `(x, y)`.
pub fn in_zone(position: &Vector3, x: f64, y: f64) -> bool {
    position.planar_distance(x, y) < ZONE_RADIUS && position.z < ZONE_ALTITUDE
}

pub struct DeliveryLedger {
    swarm_id: String,
    results_dir: PathBuf,
    state: Mutex<LedgerState>,
}

impl DeliveryLedger {
    pub fn new(swarm_id: &str, results_dir: &Path) -> Self {
        Self {
            swarm_id: swarm_id.to_string(),
            results_dir: results_dir.to_path_buf(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn swarm_id(&self) -> &str {
        &self.swarm_id
    }

    pub async fn is_full(&self) -> bool {
        self.state.lock().await.pending.len() >= MAX_PENDING_PACKAGES
    }

    /// Registers a freshly generated package as pending.
    pub async fn add_package(&self, package: Package) -> Result<(), FleetError> {
        let mut state = self.state.lock().await;
        if state.pending.len() >= MAX_PENDING_PACKAGES {
            return Err(FleetError::PoolExhausted(self.swarm_id.clone()));
        }
        debug!("Swarm {} issued package {}", self.swarm_id, package.id);
        state.pending.insert(package.id.clone(), package);
        Ok(())
    }

    pub async fn package(&self, package_id: &str) -> Option<Package> {
        self.state.lock().await.pending.get(package_id).cloned()
    }

    /// Assigns a package to a drone hovering in the pickup zone.
    ///
    /// Checks run in order: unknown package, already picked, outside the
    /// zone, over capacity. Only the capacity check touches state on failure,
    /// by counting the rejection.
    pub async fn pickup(
        &self,
        package_id: &str,
        drone_id: &str,
        position: Vector3,
    ) -> Result<(), FleetError> {
        let mut state = self.state.lock().await;

        let (weight, picked) = match state.pending.get(package_id) {
            Some(package) => (package.weight, package.picked),
            None => return Err(FleetError::package_not_found(package_id)),
        };
        if picked {
            return Err(FleetError::AlreadyPicked(package_id.to_string()));
        }

        if !in_zone(&position, PICKUP_ZONE.0, PICKUP_ZONE.1) {
            return Err(FleetError::OutOfZone {
                drone_id: drone_id.to_string(),
                package_id: package_id.to_string(),
            });
        }

        let load = state.carry_load.get(drone_id).copied().unwrap_or(0.0) + weight;
        if load > MAX_CARRY_WEIGHT {
            state.capacity_rejections += 1;
            info!(
                "Drone {} cannot carry package {} ({} > {})",
                drone_id, package_id, load, MAX_CARRY_WEIGHT
            );
            return Err(FleetError::CapacityExceeded {
                drone_id: drone_id.to_string(),
                load,
                max: MAX_CARRY_WEIGHT,
            });
        }

        if let Some(package) = state.pending.get_mut(package_id) {
            package.picked = true;
            package.assigned_drone = Some(drone_id.to_string());
        }
        state.carry_load.insert(drone_id.to_string(), load);

        info!("Drone {} picked up package {}", drone_id, package_id);
        Ok(())
    }

    /// Completes a delivery by the drone carrying the package, hovering over
    /// the package's destination.
    pub async fn deliver(
        &self,
        package_id: &str,
        drone_id: &str,
        position: Vector3,
    ) -> Result<(), FleetError> {
        let mut state = self.state.lock().await;

        let package = state
            .pending
            .get(package_id)
            .ok_or_else(|| FleetError::package_not_found(package_id))?;

        if package.assigned_drone.as_deref() != Some(drone_id) {
            return Err(FleetError::NotAssigned {
                package_id: package_id.to_string(),
                drone_id: drone_id.to_string(),
            });
        }

        let target = package.coordinates;
        if !in_zone(&position, target.x, target.y) {
            return Err(FleetError::OutOfZone {
                drone_id: drone_id.to_string(),
                package_id: package_id.to_string(),
            });
        }

        if let Some(package) = state.pending.remove(package_id) {
            let load = state.carry_load.entry(drone_id.to_string()).or_insert(0.0);
            *load = (*load - package.weight).max(0.0);
            state.delivered += 1;
        }

        info!("Drone {} delivered package {}", drone_id, package_id);
        Ok(())
    }

    /// Weight currently carried by a drone.
    pub async fn carry_load(&self, drone_id: &str) -> f64 {
        self.state
            .lock()
            .await
            .carry_load
            .get(drone_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Pending packages assigned to a drone.
    pub async fn carried_by(&self, drone_id: &str) -> Vec<Package> {
        self.state
            .lock()
            .await
            .pending
            .values()
            .filter(|p| p.assigned_drone.as_deref() == Some(drone_id))
            .cloned()
            .collect()
    }

    pub async fn summary(&self) -> DeliverySummary {
        let state = self.state.lock().await;
        DeliverySummary {
            swarm_id: self.swarm_id.clone(),
            delivered: state.delivered,
            pending: state.pending.len(),
            capacity_rejections: state.capacity_rejections,
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.results_dir
            .join(format!("{}_results.txt", self.swarm_id))
    }

    /// Overwrites the swarm's results file with the current summary line.
    /// A failed write is logged and the summary is still returned.
    pub async fn print_deliveries(&self) -> DeliverySummary {
        let summary = self.summary().await;
        let path = self.results_path();

        match tokio::fs::write(&path, format!("{}\n", summary)).await {
            Ok(()) => info!("{}", summary),
            Err(e) => error!("Failed to write {}: {}", path.display(), e),
        }
        summary
    }
}
