//! UDP control plane exposing swarm, drone and delivery operations.
//!
//! Each datagram carries one bincode [`Packet::Request`]. The receive loop
//! hands every request to its own task, so a slow command such as a
//! synchronous connect never holds up other callers. The reply echoes the
//! request id back to the sender's address.

use crate::config::ServerConfig;
use crate::driver::DriverFactory;
use crate::error::FleetError;
use crate::packages::PackageGenerator;
use crate::swarm_manager::SwarmManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Arena, Packet, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Everything a request handler can reach.
pub struct ServerContext {
    pub swarms: SwarmManager,
    pub packages: PackageGenerator,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            swarms: SwarmManager::new(factory, config.drone.clone()),
            packages: PackageGenerator::new(&config.results_dir),
        }
    }
}

pub struct Server {
    socket: Arc<UdpSocket>,
    context: Arc<ServerContext>,
}

impl Server {
    pub async fn new(
        config: &ServerConfig,
        factory: Arc<dyn DriverFactory>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        Ok(Server {
            socket,
            context: Arc::new(ServerContext::new(config, factory)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Receives requests until the socket fails unrecoverably.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut buffer = [0u8; 2048];

        loop {
            let (len, addr) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let (request_id, request) = match deserialize::<Packet>(&buffer[..len]) {
                Ok(Packet::Request {
                    request_id,
                    request,
                }) => (request_id, request),
                Ok(Packet::Response { .. }) => {
                    warn!("Ignoring response packet from {}", addr);
                    continue;
                }
                Err(_) => {
                    warn!("Failed to deserialize packet from {}", addr);
                    continue;
                }
            };

            let socket = Arc::clone(&self.socket);
            let context = Arc::clone(&self.context);
            tokio::spawn(async move {
                debug!("Request {} from {}: {:?}", request_id, addr, request);
                let response = handle_request(&context, request).await;
                let packet = Packet::Response {
                    request_id,
                    response,
                };
                if let Err(e) = send_packet(&socket, &packet, addr).await {
                    error!("Failed to send response to {}: {}", addr, e);
                }
            });
        }
    }
}

async fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

fn error_response(e: FleetError) -> Response {
    if e.is_not_found() {
        Response::NotFound {
            reason: e.to_string(),
        }
    } else {
        warn!("Request failed: {}", e);
        Response::Failed {
            reason: e.to_string(),
        }
    }
}

/// Runs one request against the context and builds its reply. Missing
/// swarms, drones, arenas and packages map to `NotFound`, every other
/// failure to `Failed`.
pub async fn handle_request(context: &ServerContext, request: Request) -> Response {
    match dispatch(context, request).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn dispatch(context: &ServerContext, request: Request) -> Result<Response, FleetError> {
    let swarms = &context.swarms;
    let packages = &context.packages;

    let response = match request {
        Request::Arena { swarm_id } => {
            let arena = swarms
                .get_arena(&swarm_id)
                .await
                .ok_or_else(|| FleetError::swarm_not_found(&swarm_id))?;
            Response::Arena(Arena::clone(&arena))
        }

        Request::RegisterSwarm {
            swarm_id,
            arena_id,
            seed,
        } => {
            swarms.register_swarm(&swarm_id, arena_id).await?;
            let seed = seed.unwrap_or_else(rand::random);
            info!("Swarm {} packages seeded with {}", swarm_id, seed);
            packages.initialize_swarm(&swarm_id, seed).await;
            Response::SwarmRegistered { swarm_id, arena_id }
        }

        Request::Connect {
            swarm_id,
            drone_id,
            link,
        } => {
            let drone = swarms.add_drone(&swarm_id, &drone_id, &link).await?;
            Response::Connected(drone.get_status().await)
        }

        Request::Disconnect { swarm_id, drone_id } => {
            swarms.remove_drone(&swarm_id, &drone_id).await?;
            Response::Disconnected
        }

        Request::Calibrate { swarm_id, drone_id } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            drone.reset_estimator().await;
            Response::Calibrated
        }

        Request::Takeoff {
            swarm_id,
            drone_id,
            z,
            velocity,
        } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            Response::Takeoff(drone.takeoff(z, velocity).await?)
        }

        Request::Land {
            swarm_id,
            drone_id,
            z,
            velocity,
        } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            Response::Land(drone.land(z, velocity).await?)
        }

        Request::Stop { swarm_id, drone_id } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            drone.stop().await?;
            Response::Stopped
        }

        Request::GoTo {
            swarm_id,
            drone_id,
            x,
            y,
            z,
            yaw,
            velocity,
            relative,
        } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            Response::GoTo(drone.go_to(x, y, z, yaw, velocity, relative).await?)
        }

        Request::DroneStatus { swarm_id, drone_id } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            Response::DroneStatus(drone.get_status().await)
        }

        Request::SwarmStatus { swarm_id } => {
            let swarm = swarms
                .get_swarm(&swarm_id)
                .await
                .ok_or_else(|| FleetError::swarm_not_found(&swarm_id))?;
            Response::SwarmStatus(swarm.statuses().await)
        }

        Request::RequestPackage { swarm_id } => {
            Response::Package(packages.get_package(&swarm_id).await?)
        }

        Request::Pickup {
            swarm_id,
            drone_id,
            package_id,
        } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            packages.pickup(&swarm_id, &package_id, &drone).await?;
            Response::PickedUp
        }

        Request::Deliver {
            swarm_id,
            drone_id,
            package_id,
        } => {
            let drone = swarms.get_drone(&swarm_id, &drone_id).await?;
            packages.deliver(&swarm_id, &package_id, &drone).await?;
            Response::Delivered
        }

        Request::PrintDeliveries { swarm_id } => {
            Response::DeliverySummary(packages.print_deliveries(&swarm_id).await?)
        }
    };

    Ok(response)
}
