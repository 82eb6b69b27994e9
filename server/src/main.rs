use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind both channels on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the reliable channel
    #[arg(short = 'r', long, default_value = "54555")]
    reliable_port: u16,

    /// Port for the datagram channel
    #[arg(short = 'd', long, default_value = "54777")]
    datagram_port: u16,

    /// Maximum concurrent connections
    #[arg(short = 'm', long, default_value = "16")]
    max_clients: usize,

    /// Tick rate (updates per second)
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting session server...");

    let config = ServerConfig {
        bind_addr: args.host,
        reliable_port: args.reliable_port,
        datagram_port: args.datagram_port,
        max_clients: args.max_clients,
        tick_rate: args.tick_rate,
    };

    let server = match Server::bind(&config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    // Ctrl+C flips the server into shutdown; the main loop exits cleanly.
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                server.shutdown();
            }
        });
    }

    server.run().await?;

    Ok(())
}
