use clap::Parser;
use client::network::Client;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server port for the reliable channel
    #[arg(short = 'r', long, default_value = "54555")]
    reliable_port: u16,

    /// Server port for the datagram channel
    #[arg(short = 'd', long, default_value = "54777")]
    datagram_port: u16,

    /// Display name to log in with
    #[arg(short = 'n', long, default_value = "runner")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!(
        "Connecting to: {}:{} (datagrams on {})",
        args.server, args.reliable_port, args.datagram_port
    );

    let mut client =
        Client::connect(&args.server, args.reliable_port, args.datagram_port).await?;

    client.run(&args.name).await?;

    info!("Session over");

    Ok(())
}
