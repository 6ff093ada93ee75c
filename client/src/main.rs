use clap::Parser;
use client::commands::{describe, Cli};
use client::network::ControlClient;
use log::info;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let request = cli.command.into_request(cli.swarm);

    info!("Sending {:?} to {}", request, cli.server);
    let mut client = ControlClient::new(&cli.server, Duration::from_millis(cli.timeout_ms)).await?;
    let response = client.send_request(request).await?;

    println!("{}", describe(&response));
    if response.is_error() {
        std::process::exit(1);
    }

    Ok(())
}
