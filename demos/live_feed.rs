//! Example: tail the claims event stream
//!
//! Connects to `$CLAIMS_API_URL` (default `http://localhost:8000`), logs
//! every event and connection change, and prints the live feed before
//! shutting down.
//!
//! Run with: RUST_LOG=debug cargo run --example live_feed

use claims_realtime::{ConnectionState, RealtimeClient, RealtimeConfig, RecentEvents, Severity};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RealtimeConfig::from_env()?;
    let client = RealtimeClient::new(config)?;
    info!("Streaming from {}", client.stream_url());

    client.on_state_change(|state| match state {
        ConnectionState::Open => info!("Live"),
        ConnectionState::Closed => warn!("Offline, retrying"),
        other => info!("Stream {}", other),
    });

    client.subscribe(|event| {
        if event.severity == Some(Severity::High) {
            warn!("[{}] {} ({})", event.kind, event.title, event.id);
        } else {
            info!("[{}] {} ({})", event.kind, event.title, event.id);
        }
    });

    let feed = RecentEvents::default();
    feed.attach(&client);

    client.start().await?;

    // Run for a while
    tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;

    info!("Live feed ({} items):", feed.len());
    for event in feed.snapshot() {
        info!(
            "  {} {:<16} {}",
            event.occurred_at.format("%H:%M:%S"),
            event.kind.to_string(),
            event.title
        );
    }

    let snapshot = client.metrics().snapshot();
    info!("Final metrics:");
    info!("  Connections: {}", snapshot.connections_total);
    info!("  Events dispatched: {}", snapshot.events_dispatched_total);
    info!("  Frames dropped: {}", snapshot.frames_dropped_total);

    // Graceful shutdown
    client.stop().await?;
    info!("Stream stopped");

    Ok(())
}
