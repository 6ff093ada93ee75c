//! Error taxonomy for swarm, drone and delivery operations.

use crate::driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("connection to {uri} failed: {reason}")]
    ConnectionFailed { uri: String, reason: String },

    #[error("drone {drone_id} would carry {load} (maximum {max})")]
    CapacityExceeded {
        drone_id: String,
        load: f64,
        max: f64,
    },

    #[error("drone {drone_id} is outside the zone of package {package_id}")]
    OutOfZone {
        drone_id: String,
        package_id: String,
    },

    #[error("swarm {0} is already registered")]
    AlreadyRegistered(String),

    #[error("swarm {0} has reached its pending package limit")]
    PoolExhausted(String),

    #[error("swarm {0} was given an empty coordinate pool")]
    EmptyPool(String),

    #[error("package {0} has already been picked up")]
    AlreadyPicked(String),

    #[error("package {package_id} is not carried by drone {drone_id}")]
    NotAssigned {
        package_id: String,
        drone_id: String,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl FleetError {
    pub fn swarm_not_found(id: &str) -> Self {
        FleetError::NotFound {
            kind: "swarm",
            id: id.to_string(),
        }
    }

    pub fn drone_not_found(id: &str) -> Self {
        FleetError::NotFound {
            kind: "drone",
            id: id.to_string(),
        }
    }

    pub fn package_not_found(id: &str) -> Self {
        FleetError::NotFound {
            kind: "package",
            id: id.to_string(),
        }
    }

    pub fn arena_not_found(id: u32) -> Self {
        FleetError::NotFound {
            kind: "arena",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound { .. })
    }
}
