//! # Swarm Server Library
//!
//! This library coordinates fleets of small indoor drones for a shared flight
//! lab. Independent swarms each own one arena, and every drone in a swarm is
//! commanded through arena-aware, validated motion commands. A delivery game
//! runs on top: each swarm draws packages from a seeded generator and its
//! drones pick them up and drop them off under proximity and weight rules.
//!
//! ## Core Responsibilities
//!
//! ### Drone Command Sanitization
//! Motion targets are clamped into the swarm's arena, shifted into the flight
//! room frame by the arena offset, and given a travel duration derived from a
//! capped velocity with a minimum floor. Callers get back exactly what was
//! sent to the airframe.
//!
//! ### Connection Lifecycle
//! Drones connect through a pluggable radio driver. Connects wait for the
//! driver's verdict with a timeout, telemetry streams in through a per-drone
//! event pump, and a drone whose link drops removes itself from its swarm.
//!
//! ### Delivery Bookkeeping
//! Each swarm has a ledger of pending packages, per-drone carry load, and
//! delivery counters. All ledger operations for one swarm are serialized
//! behind a single lock.
//!
//! ## Module Organization
//!
//! ### Drone Module (`drone`)
//! One connected airframe: telemetry, state machine, and the sanitized
//! takeoff, land, go-to and stop commands.
//!
//! ### Swarm Modules (`swarm`, `swarm_manager`)
//! Two-level registry. The manager maps swarm ids to swarms and arenas; each
//! swarm maps drone ids to drones. The manager's lock is never held while a
//! swarm's lock is taken.
//!
//! ### Delivery Modules (`packages`, `delivery`)
//! Seeded package generation per swarm and the ledger that validates pickups
//! and deliveries against live drone positions.
//!
//! ### Driver Modules (`driver`, `loopback`)
//! The trait seam towards the radio stack and an in-process loopback driver
//! used when no radio is attached.
//!
//! ### Network Module (`network`)
//! UDP control plane carrying bincode request and response packets.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::loopback::{LinkBehavior, LoopbackFactory};
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!     let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
//!
//!     // Binds the socket; requests are served once `run` is awaited.
//!     let server = Server::new(&config, factory).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod driver;
pub mod drone;
pub mod error;
pub mod loopback;
pub mod network;
pub mod packages;
pub mod swarm;
pub mod swarm_manager;
