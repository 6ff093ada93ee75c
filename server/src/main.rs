use clap::Parser;
use log::{error, info};
use server::config::{DroneConfig, ServerConfig};
use server::loopback::{LinkBehavior, LoopbackFactory};
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, starts the control plane, and disconnects
/// every drone on Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Directory for the per-swarm delivery results
        #[clap(short, long, default_value = ".")]
        results_dir: PathBuf,
        /// Upper bound for a drone connect, in milliseconds
        #[clap(long, default_value = "10000")]
        connect_timeout_ms: u64,
        /// Velocity cap for every motion command (m/s)
        #[clap(long, default_value_t = shared::MAX_VELOCITY)]
        max_velocity: f64,
        /// Shortest duration of any motion command (s)
        #[clap(long, default_value_t = shared::MIN_DURATION)]
        min_duration: f64,
    }

    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        results_dir: args.results_dir,
        drone: DroneConfig {
            max_velocity: args.max_velocity,
            min_duration: args.min_duration,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            ..DroneConfig::default()
        }
        // No radio stack is linked into this binary; drones are simulated.
        .without_delays(),
    };

    let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
    let server = Server::new(&config, factory).await?;
    let context = server.context();

    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    context.swarms.disconnect_all().await;
    Ok(())
}
