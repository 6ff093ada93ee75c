//! Seeded package generation, one PRNG and one ledger per swarm.
//!
//! Each swarm's generator consumes its PRNG in a fixed order per package:
//! destination index, then weight, then the 128-bit id. The same seed thus
//! always yields the same package sequence.

use crate::delivery::DeliveryLedger;
use crate::drone::Drone;
use crate::error::FleetError;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{DeliverySummary, Package, Vector3, COORDINATE_POOL, PACKAGE_WEIGHTS};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

struct SwarmPackages {
    rng: StdRng,
    pool: Vec<Vector3>,
    ledger: Arc<DeliveryLedger>,
}

pub struct PackageGenerator {
    results_dir: PathBuf,
    swarms: Mutex<HashMap<String, SwarmPackages>>,
}

impl PackageGenerator {
    pub fn new(results_dir: &Path) -> Self {
        Self {
            results_dir: results_dir.to_path_buf(),
            swarms: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds the swarm's generator over the standard coordinate pool and gives
    /// it a fresh ledger. Calling this again for the same swarm starts over
    /// with the new seed.
    pub async fn initialize_swarm(&self, swarm_id: &str, seed: u64) -> Arc<DeliveryLedger> {
        self.install(swarm_id, seed, COORDINATE_POOL.to_vec()).await
    }

    /// Like [`initialize_swarm`](Self::initialize_swarm), drawing destinations
    /// from the swarm's own coordinate pool.
    pub async fn initialize_swarm_with_pool(
        &self,
        swarm_id: &str,
        seed: u64,
        pool: Vec<Vector3>,
    ) -> Result<Arc<DeliveryLedger>, FleetError> {
        if pool.is_empty() {
            return Err(FleetError::EmptyPool(swarm_id.to_string()));
        }
        Ok(self.install(swarm_id, seed, pool).await)
    }

    async fn install(&self, swarm_id: &str, seed: u64, pool: Vec<Vector3>) -> Arc<DeliveryLedger> {
        let ledger = Arc::new(DeliveryLedger::new(swarm_id, &self.results_dir));
        let mut swarms = self.swarms.lock().await;
        if swarms.contains_key(swarm_id) {
            info!("Reseeding packages of swarm {}", swarm_id);
        }
        swarms.insert(
            swarm_id.to_string(),
            SwarmPackages {
                rng: StdRng::seed_from_u64(seed),
                pool,
                ledger: Arc::clone(&ledger),
            },
        );
        ledger
    }

    pub async fn ledger(&self, swarm_id: &str) -> Result<Arc<DeliveryLedger>, FleetError> {
        self.swarms
            .lock()
            .await
            .get(swarm_id)
            .map(|s| Arc::clone(&s.ledger))
            .ok_or_else(|| FleetError::swarm_not_found(swarm_id))
    }

    /// Draws the next package for a swarm and registers it as pending.
    ///
    /// Fails with `PoolExhausted` without consuming randomness once the
    /// swarm has the maximum number of pending packages.
    pub async fn get_package(&self, swarm_id: &str) -> Result<Package, FleetError> {
        let mut swarms = self.swarms.lock().await;
        let entry = swarms
            .get_mut(swarm_id)
            .ok_or_else(|| FleetError::swarm_not_found(swarm_id))?;

        if entry.ledger.is_full().await {
            return Err(FleetError::PoolExhausted(swarm_id.to_string()));
        }

        let index = entry.rng.gen_range(0..entry.pool.len());
        let weight = PACKAGE_WEIGHTS[entry.rng.gen_range(0..PACKAGE_WEIGHTS.len())];
        let id = format!("{:032x}", entry.rng.gen::<u128>());

        let package = Package::new(id, entry.pool[index], weight);
        entry.ledger.add_package(package.clone()).await?;
        Ok(package)
    }

    /// Picks up a package with the drone at its current position.
    pub async fn pickup(
        &self,
        swarm_id: &str,
        package_id: &str,
        drone: &Drone,
    ) -> Result<(), FleetError> {
        let ledger = self.ledger(swarm_id).await?;
        let position = drone.flight_position().await;
        ledger.pickup(package_id, drone.id(), position).await
    }

    /// Delivers a package with the drone at its current position.
    pub async fn deliver(
        &self,
        swarm_id: &str,
        package_id: &str,
        drone: &Drone,
    ) -> Result<(), FleetError> {
        let ledger = self.ledger(swarm_id).await?;
        let position = drone.flight_position().await;
        ledger.deliver(package_id, drone.id(), position).await
    }

    pub async fn print_deliveries(&self, swarm_id: &str) -> Result<DeliverySummary, FleetError> {
        let ledger = self.ledger(swarm_id).await?;
        Ok(ledger.print_deliveries().await)
    }
}
