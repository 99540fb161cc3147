//! Console chat client
//!
//! Usage: `chat_client <server[:port]> <username>`. Each console line is sent
//! as chat text; `logout` leaves.

use std::env;
use std::process;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use chat_relay::{parse_console_line, ChatClient, ClientConfig, MessageType};

/// How long to wait for the server's logout acknowledgement
const LOGOUT_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=warn")),
        )
        .init();

    let config = match ClientConfig::from_args(env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: chat_client <server[:port]> <username>");
            process::exit(2);
        }
    };

    let client = match ChatClient::connect(&config.url(), &config.username).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", config.url(), e);
            process::exit(1);
        }
    };
    println!("Connected to server.");

    let (mut sender, mut receiver) = client.into_split();

    // Print everything the server sends until it says goodbye
    let mut printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Some(msg)) => match msg.kind {
                    MessageType::Logout => {
                        println!("You have been logged out.");
                        break;
                    }
                    MessageType::Shutdown => {
                        println!("Server has been shut down.");
                        break;
                    }
                    _ => println!("{}: {}", msg.sender_id.0, msg.body),
                },
                Ok(None) => {
                    println!("Disconnected from server.");
                    break;
                }
                Err(e) => {
                    debug!("Receive failed: {}", e);
                    println!("Connection lost.");
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut printer => return Ok(()),
            line = lines.next_line() => {
                // End of input counts as logout
                let message = match line? {
                    Some(line) => parse_console_line(&line),
                    None => parse_console_line("logout"),
                };
                let logout = message.kind == MessageType::Logout;
                sender.send(message).await?;
                if logout {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(LOGOUT_GRACE, printer).await;
    let _ = sender.close().await;

    Ok(())
}
