//! Control-plane messages exchanged between `swarmctl` and the server.
//!
//! Every datagram carries one bincode-encoded [`Packet`]. Requests are tagged
//! with a caller-chosen `request_id` which the server echoes back, so a client
//! can tell late replies from the one it is waiting for.

use crate::{
    Arena, DeliverySummary, DroneStatus, GoToResult, LinkConfig, Package, TakeoffLandResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Request { request_id: u32, request: Request },
    Response { request_id: u32, response: Response },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Request {
    Arena {
        swarm_id: String,
    },
    RegisterSwarm {
        swarm_id: String,
        arena_id: u32,
        /// Seeds the swarm's package generator when present.
        seed: Option<u64>,
    },
    Connect {
        swarm_id: String,
        drone_id: String,
        link: LinkConfig,
    },
    Disconnect {
        swarm_id: String,
        drone_id: String,
    },
    Calibrate {
        swarm_id: String,
        drone_id: String,
    },
    Takeoff {
        swarm_id: String,
        drone_id: String,
        z: f64,
        velocity: f64,
    },
    Land {
        swarm_id: String,
        drone_id: String,
        z: f64,
        velocity: f64,
    },
    Stop {
        swarm_id: String,
        drone_id: String,
    },
    GoTo {
        swarm_id: String,
        drone_id: String,
        x: f64,
        y: f64,
        z: f64,
        yaw: f64,
        velocity: f64,
        relative: bool,
    },
    DroneStatus {
        swarm_id: String,
        drone_id: String,
    },
    SwarmStatus {
        swarm_id: String,
    },
    RequestPackage {
        swarm_id: String,
    },
    Pickup {
        swarm_id: String,
        drone_id: String,
        package_id: String,
    },
    Deliver {
        swarm_id: String,
        drone_id: String,
        package_id: String,
    },
    PrintDeliveries {
        swarm_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Response {
    Arena(Arena),
    SwarmRegistered { swarm_id: String, arena_id: u32 },
    Connected(DroneStatus),
    Disconnected,
    Calibrated,
    Takeoff(TakeoffLandResult),
    Land(TakeoffLandResult),
    GoTo(GoToResult),
    Stopped,
    DroneStatus(DroneStatus),
    SwarmStatus(Vec<DroneStatus>),
    Package(Package),
    PickedUp,
    Delivered,
    DeliverySummary(DeliverySummary),
    NotFound { reason: String },
    Failed { reason: String },
}

impl Response {
    /// True for the two error replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::NotFound { .. } | Response::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Vector3, COORDINATE_POOL};

    #[test]
    fn test_request_packet_serialization() {
        let packet = Packet::Request {
            request_id: 7,
            request: Request::GoTo {
                swarm_id: "f1".to_string(),
                drone_id: "d1".to_string(),
                x: 1.0,
                y: -0.5,
                z: 0.8,
                yaw: 0.0,
                velocity: 0.5,
                relative: true,
            },
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Request {
                request_id,
                request,
            } => {
                assert_eq!(request_id, 7);
                match request {
                    Request::GoTo { x, relative, .. } => {
                        assert_eq!(x, 1.0);
                        assert!(relative);
                    }
                    _ => panic!("Wrong request type after deserialization"),
                }
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_package_response_serialization() {
        let package = Package::new("00ff".to_string(), COORDINATE_POOL[3], 0.75);
        let packet = Packet::Response {
            request_id: 1,
            response: Response::Package(package.clone()),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Response { response, .. } => {
                assert_eq!(response, Response::Package(package));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_error_responses() {
        assert!(Response::NotFound {
            reason: "Swarm f9".to_string()
        }
        .is_error());
        assert!(Response::Failed {
            reason: "link".to_string()
        }
        .is_error());
        assert!(!Response::Stopped.is_error());
        assert!(!Response::Arena(crate::Arena::new(
            9,
            (0.0, 1.0),
            (0.0, 1.0),
            (0.0, 1.0),
            Vector3::default()
        ))
        .is_error());
    }
}
