//! # Swarm Control Client Library
//!
//! This library backs `swarmctl`, the operator's command-line tool for the
//! swarm server. Every invocation sends exactly one request over the UDP
//! control plane and prints the reply.
//!
//! ## Module Organization
//!
//! ### Commands Module (`commands`)
//! The clap command tree and its mapping onto control-plane requests, plus
//! the one-line rendering of every reply.
//!
//! ### Network Module (`network`)
//! A small request/response client: it tags each request with an id, skips
//! stale replies, and gives up after a configurable timeout.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::commands::Command;
//! use client::network::ControlClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = ControlClient::new("127.0.0.1:8080", Duration::from_secs(5)).await?;
//!
//!     let request = Command::Register { arena: 0, seed: Some(42) }.into_request("f1".into());
//!     let response = client.send_request(request).await?;
//!     println!("{}", client::commands::describe(&response));
//!
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod network;
