//! A minimal chat client: establishes a Tether session under a chosen id
//! and sends each stdin line as a message. The driver handles reconnects
//! and keepalive; just type.
//!
//! ```text
//! cargo run --bin chat-client -- <id> [socket-path]
//! ```

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use tether::{ClientBody, Dialer, DriverConfig, DriverState, Packet, SessionDriver};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let id = args.next().unwrap_or_else(|| {
        eprintln!("usage: chat-client <id> [socket-path]");
        std::process::exit(2);
    });
    let socket_path = args.next().unwrap_or_else(|| "/tmp/tether-chat.sock".to_string());

    let config = DriverConfig::new(&id);
    let dialer = Dialer::spawn(&socket_path, config.retry_wait);
    let driver = Arc::new(SessionDriver::new(dialer, config));

    let mut state = driver.state();
    tokio::spawn({
        let driver = Arc::clone(&driver);
        async move {
            if let Err(e) = driver.run().await {
                eprintln!("session driver stopped: {e}");
                std::process::exit(1);
            }
        }
    });

    // Announce state changes so the user can see reconnects happen.
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            match current {
                DriverState::Idle => eprintln!("(disconnected, retrying...)"),
                DriverState::Handshaking => eprintln!("(handshaking...)"),
                DriverState::Active => eprintln!("(connected as {id})"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        driver
            .send(&Packet::new(ClientBody::Message { message: line }))
            .await?;
    }

    driver.dispose().await;
    Ok(())
}
