//! Top-level registry of swarms and the arena each one flies in.
//!
//! The manager's lock only ever guards the lookup or insertion of a swarm.
//! It is released before any swarm's own drone lock is taken, so the two
//! levels are always acquired in the same order.

use crate::config::DroneConfig;
use crate::driver::DriverFactory;
use crate::drone::Drone;
use crate::error::FleetError;
use crate::swarm::Swarm;
use log::info;
use shared::{Arena, LinkConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Registry {
    swarms: HashMap<String, Arc<Swarm>>,
    arenas: HashMap<String, Arc<Arena>>,
}

pub struct SwarmManager {
    registry: RwLock<Registry>,
    factory: Arc<dyn DriverFactory>,
    config: DroneConfig,
}

impl SwarmManager {
    pub fn new(factory: Arc<dyn DriverFactory>, config: DroneConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            factory,
            config,
        }
    }

    /// Registers a swarm bound to one of the canonical arenas.
    ///
    /// A swarm id can be registered once; later attempts fail with
    /// `AlreadyRegistered` and leave the existing swarm untouched.
    pub async fn register_swarm(
        &self,
        swarm_id: &str,
        arena_id: u32,
    ) -> Result<Arc<Swarm>, FleetError> {
        let arena = Arena::by_id(arena_id).ok_or_else(|| FleetError::arena_not_found(arena_id))?;
        let arena = Arc::new(arena);

        let mut registry = self.registry.write().await;
        if registry.swarms.contains_key(swarm_id) {
            return Err(FleetError::AlreadyRegistered(swarm_id.to_string()));
        }

        let swarm = Arc::new(Swarm::new(
            swarm_id,
            Arc::clone(&arena),
            Arc::clone(&self.factory),
            self.config.clone(),
        ));
        registry
            .swarms
            .insert(swarm_id.to_string(), Arc::clone(&swarm));
        registry.arenas.insert(swarm_id.to_string(), arena);

        info!("Registered swarm {} in arena {}", swarm_id, arena_id);
        Ok(swarm)
    }

    pub async fn get_swarm(&self, swarm_id: &str) -> Option<Arc<Swarm>> {
        self.registry.read().await.swarms.get(swarm_id).cloned()
    }

    pub async fn get_arena(&self, swarm_id: &str) -> Option<Arc<Arena>> {
        self.registry.read().await.arenas.get(swarm_id).cloned()
    }

    pub async fn swarm_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.read().await.swarms.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn require_swarm(&self, swarm_id: &str) -> Result<Arc<Swarm>, FleetError> {
        self.get_swarm(swarm_id)
            .await
            .ok_or_else(|| FleetError::swarm_not_found(swarm_id))
    }

    pub async fn add_drone(
        &self,
        swarm_id: &str,
        drone_id: &str,
        link: &LinkConfig,
    ) -> Result<Arc<Drone>, FleetError> {
        let swarm = self.require_swarm(swarm_id).await?;
        swarm.add_drone(drone_id, link).await
    }

    pub async fn remove_drone(&self, swarm_id: &str, drone_id: &str) -> Result<(), FleetError> {
        let swarm = self.require_swarm(swarm_id).await?;
        swarm.remove_drone(drone_id).await
    }

    pub async fn get_drone(&self, swarm_id: &str, drone_id: &str) -> Result<Arc<Drone>, FleetError> {
        let swarm = self.require_swarm(swarm_id).await?;
        swarm
            .get_drone(drone_id)
            .await
            .ok_or_else(|| FleetError::drone_not_found(drone_id))
    }

    /// Disconnects every drone of every swarm. Called on shutdown.
    pub async fn disconnect_all(&self) {
        let swarms: Vec<Arc<Swarm>> = self.registry.read().await.swarms.values().cloned().collect();
        for swarm in swarms {
            info!("Disconnecting swarm {}", swarm.id());
            swarm.clear().await;
        }
    }
}
