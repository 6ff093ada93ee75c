//! Command-line surface of `swarmctl`.
//!
//! Each subcommand maps onto exactly one control-plane [`Request`]; replies
//! are turned back into a human-readable line by [`describe`].

use clap::{Parser, Subcommand};
use shared::{LinkConfig, Response};

pub use shared::Request;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    pub server: String,

    /// How long to wait for a reply, in milliseconds
    #[arg(short = 't', long, default_value = "15000")]
    pub timeout_ms: u64,

    /// Swarm the command applies to
    #[arg(short = 'f', long, default_value = "f1")]
    pub swarm: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show the arena the swarm flies in
    Arena,
    /// Register the swarm in an arena
    Register {
        arena: u32,
        /// Seed for the swarm's package generator
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Connect a drone over the radio
    Connect {
        drone: String,
        #[arg(long, default_value = "0")]
        radio: u32,
        #[arg(long, default_value = "80")]
        channel: u32,
        #[arg(long, default_value = "E7E7E7E7E7")]
        address: String,
        #[arg(long, default_value = "2M")]
        data_rate: String,
    },
    /// Disconnect a drone and remove it from the swarm
    Disconnect { drone: String },
    /// Reset a drone's position estimator
    Calibrate { drone: String },
    Takeoff {
        drone: String,
        #[arg(default_value = "0.5")]
        z: f64,
        #[arg(short, long, default_value = "1.0")]
        velocity: f64,
    },
    Land {
        drone: String,
        #[arg(default_value = "0.0")]
        z: f64,
        #[arg(short, long, default_value = "1.0")]
        velocity: f64,
    },
    Stop { drone: String },
    /// Fly to a target in arena coordinates
    Goto {
        drone: String,
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(allow_negative_numbers = true)]
        z: f64,
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        yaw: f64,
        #[arg(short, long, default_value = "1.0")]
        velocity: f64,
        /// Treat x/y/z as an offset from the current position
        #[arg(short, long)]
        relative: bool,
    },
    /// Telemetry of one drone
    Status { drone: String },
    /// Telemetry of every drone in the swarm
    Swarm,
    /// Request the next package
    Package,
    Pickup { drone: String, package: String },
    Deliver { drone: String, package: String },
    /// Write and show the delivery summary
    Deliveries,
}

impl Command {
    pub fn into_request(self, swarm_id: String) -> Request {
        match self {
            Command::Arena => Request::Arena { swarm_id },
            Command::Register { arena, seed } => Request::RegisterSwarm {
                swarm_id,
                arena_id: arena,
                seed,
            },
            Command::Connect {
                drone,
                radio,
                channel,
                address,
                data_rate,
            } => Request::Connect {
                swarm_id,
                drone_id: drone,
                link: LinkConfig {
                    radio_id: radio,
                    channel,
                    address,
                    data_rate,
                },
            },
            Command::Disconnect { drone } => Request::Disconnect {
                swarm_id,
                drone_id: drone,
            },
            Command::Calibrate { drone } => Request::Calibrate {
                swarm_id,
                drone_id: drone,
            },
            Command::Takeoff { drone, z, velocity } => Request::Takeoff {
                swarm_id,
                drone_id: drone,
                z,
                velocity,
            },
            Command::Land { drone, z, velocity } => Request::Land {
                swarm_id,
                drone_id: drone,
                z,
                velocity,
            },
            Command::Stop { drone } => Request::Stop {
                swarm_id,
                drone_id: drone,
            },
            Command::Goto {
                drone,
                x,
                y,
                z,
                yaw,
                velocity,
                relative,
            } => Request::GoTo {
                swarm_id,
                drone_id: drone,
                x,
                y,
                z,
                yaw,
                velocity,
                relative,
            },
            Command::Status { drone } => Request::DroneStatus {
                swarm_id,
                drone_id: drone,
            },
            Command::Swarm => Request::SwarmStatus { swarm_id },
            Command::Package => Request::RequestPackage { swarm_id },
            Command::Pickup { drone, package } => Request::Pickup {
                swarm_id,
                drone_id: drone,
                package_id: package,
            },
            Command::Deliver { drone, package } => Request::Deliver {
                swarm_id,
                drone_id: drone,
                package_id: package,
            },
            Command::Deliveries => Request::PrintDeliveries { swarm_id },
        }
    }
}

/// One-line rendering of a reply.
pub fn describe(response: &Response) -> String {
    match response {
        Response::Arena(a) => format!(
            "arena {}: x [{}, {}] y [{}, {}] z [{}, {}] offset ({}, {}, {})",
            a.id, a.min_x, a.max_x, a.min_y, a.max_y, a.min_z, a.max_z, a.offset_x, a.offset_y,
            a.offset_z
        ),
        Response::SwarmRegistered { swarm_id, arena_id } => {
            format!("swarm {} registered in arena {}", swarm_id, arena_id)
        }
        Response::Connected(s) => format!("{} connected ({})", s.id, s.status),
        Response::Disconnected => "disconnected".to_string(),
        Response::Calibrated => "estimator reset".to_string(),
        Response::Takeoff(r) => format!("taking off to z={:.2} in {:.2}s", r.target_z, r.duration),
        Response::Land(r) => format!("landing to z={:.2} in {:.2}s", r.target_z, r.duration),
        Response::GoTo(r) => format!(
            "flying to ({:.2}, {:.2}, {:.2}) yaw {:.2} in {:.2}s{}",
            r.target_x,
            r.target_y,
            r.target_z,
            r.target_yaw,
            r.duration,
            if r.relative { " (relative)" } else { "" }
        ),
        Response::Stopped => "stopped".to_string(),
        Response::DroneStatus(s) => describe_status(s),
        Response::SwarmStatus(statuses) if statuses.is_empty() => "no drones".to_string(),
        Response::SwarmStatus(statuses) => statuses
            .iter()
            .map(describe_status)
            .collect::<Vec<_>>()
            .join("\n"),
        Response::Package(p) => format!(
            "package {} weight {} to ({:.2}, {:.2})",
            p.id, p.weight, p.coordinates.x, p.coordinates.y
        ),
        Response::PickedUp => "picked up".to_string(),
        Response::Delivered => "delivered".to_string(),
        Response::DeliverySummary(summary) => summary.to_string(),
        Response::NotFound { reason } => format!("not found: {}", reason),
        Response::Failed { reason } => format!("failed: {}", reason),
    }
}

fn describe_status(s: &shared::DroneStatus) -> String {
    format!(
        "{} {} at ({:.2}, {:.2}, {:.2}) yaw {:.2} battery {:.0}%",
        s.id, s.status, s.x, s.y, s.z, s.yaw, s.battery_percentage
    )
}
