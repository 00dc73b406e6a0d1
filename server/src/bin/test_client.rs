//! Line-oriented client for poking at a running server by hand.
//!
//! Every line typed on stdin is sent as one command; every line the server
//! sends back is printed as it arrives.

use clap::Parser;
use log::{info, warn};
use shared::Reply;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", stream.peer_addr()?);
    let (reader, mut writer) = stream.into_split();

    let mut replies = BufReader::new(reader).lines();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = replies.next_line() => match line? {
                Some(line) => {
                    if Reply::from_line(&line).is_none() {
                        warn!("Unrecognised reply");
                    }
                    println!("< {}", line);
                }
                None => {
                    println!("Server closed the connection");
                    break;
                }
            },
            line = input.next_line() => match line? {
                Some(line) => {
                    writer.write_all(line.trim_end().as_bytes()).await?;
                    writer.write_all(b"\r\n").await?;
                }
                None => {
                    info!("End of input, logging out");
                    writer.write_all(b"LOGOUT\r\n").await?;
                    break;
                }
            },
        }
    }

    Ok(())
}
