//! A minimal chat server: accepts Tether sessions on a Unix socket and
//! prints every message tagged with the sender's id.
//!
//! ```text
//! cargo run --bin chat-server -- [socket-path]
//! ```

use tether::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let socket_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/tether-chat.sock".to_string());

    let server = Server::builder().socket_path(&socket_path).build().await?;
    eprintln!("chat server listening on {socket_path}");

    let mut messages = server.messages().subscribe();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            println!("[{}] {}", msg.id, msg.message);
        }
    });

    server.run().await?;
    Ok(())
}
