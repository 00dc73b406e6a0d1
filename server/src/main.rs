use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_COLS, DEFAULT_ROWS};

/// Main-method of the application.
/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[command(author, version, about, long_about = None)]
    struct Args {
        /// Server IP address to bind to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Board height
        #[arg(short, long, default_value_t = DEFAULT_ROWS as u16, value_parser = clap::value_parser!(u16).range(1..))]
        rows: u16,
        /// Board width
        #[arg(short, long, default_value_t = DEFAULT_COLS as u16, value_parser = clap::value_parser!(u16).range(1..))]
        cols: u16,
        /// Maximum number of simultaneous connections
        #[arg(short, long, default_value = "64")]
        max_clients: usize,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        rows: usize::from(args.rows),
        cols: usize::from(args.cols),
        max_clients: args.max_clients,
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::bind(&address, config).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
