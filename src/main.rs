//! `tablewire-tail`: connects to the realtime endpoint, logs every event
//! and forwards stdin lines as chat messages.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tablewire::auth::{CredentialProvider, NoCredentials, StaticCredentials};
use tablewire::domain::{EventFilter, EventType, Message};
use tablewire::{ClientConfig, RealtimeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ClientConfig::from_env()?;
    tracing::info!(url = %config.url, "starting tablewire-tail");

    let client = match std::env::var("REALTIME_TOKEN") {
        Ok(token) if !token.is_empty() => start(config, StaticCredentials::new(token))?,
        _ => start(config, NoCredentials)?,
    };

    client.on_status(|status| {
        tracing::info!(
            state = %status.state,
            attempts = status.reconnect_attempts,
            gave_up = status.gave_up,
            reason = ?status.reason,
            "connection status"
        );
    });
    client.subscribe(EventFilter::All, |message: &Message| {
        if message.event_type() == &EventType::ConnectionStatus {
            return;
        }
        tracing::info!(
            event_type = %message.event_type(),
            timestamp = %message.timestamp(),
            data = %message.data(),
            "event"
        );
    });

    client.connect()?;

    // Keep tailing after stdin closes; only Ctrl-C stops the client.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => client.send(EventType::ChatMessage, json!({ "text": line }))?,
                None => stdin_open = false,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    tracing::info!(stats = ?client.stats(), "shutting down");
    client.shutdown().await;
    Ok(())
}

fn start<C: CredentialProvider>(
    config: ClientConfig,
    credentials: C,
) -> anyhow::Result<RealtimeClient> {
    Ok(RealtimeClient::websocket(config, credentials)?)
}
