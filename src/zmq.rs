// ZMQ subscriber loops for the node's rawtx and hashblock publishers.
//
// Each loop owns one SUB socket. On any socket error the socket is dropped
// and re-dialed after a delay, backing off once failures repeat.
// Back-pressure is cooperative: the loop awaits its handler, and handlers
// drop work they cannot take rather than buffering without bound.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(10);

/// Frame payloads live in the second part of the multipart message:
/// `[topic, payload, sequence]`.
const PAYLOAD_FRAME: usize = 1;

pub async fn run_subscriber<F, Fut>(
    endpoint: String,
    topic: &'static str,
    shutdown: CancellationToken,
    mut handler: F,
) where
    F: FnMut(Vec<u8>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut consecutive_failures = 0u32;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let mut socket = SubSocket::new();
        if let Err(e) = socket.connect(&endpoint).await {
            warn!("ZMQ {} connect to {} failed: {}", topic, endpoint, e);
            consecutive_failures += 1;
            if !wait_before_reconnect(&shutdown, consecutive_failures).await {
                break;
            }
            continue;
        }
        if let Err(e) = socket.subscribe(topic).await {
            warn!("ZMQ {} subscribe failed: {}", topic, e);
            consecutive_failures += 1;
            if !wait_before_reconnect(&shutdown, consecutive_failures).await {
                break;
            }
            continue;
        }

        info!("ZMQ {} listener connected to {}", topic, endpoint);
        consecutive_failures = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("ZMQ {} listener shutting down", topic);
                    return;
                }
                message = socket.recv() => match message {
                    Ok(message) => {
                        match message.get(PAYLOAD_FRAME) {
                            Some(payload) => handler(payload.to_vec()).await,
                            None => warn!("ZMQ {} frame without payload", topic),
                        }
                    }
                    Err(e) => {
                        error!("ZMQ {} receive failed: {}, reconnecting", topic, e);
                        break;
                    }
                }
            }
        }

        // Drop the broken socket and re-dial.
        drop(socket);
        consecutive_failures += 1;
        if !wait_before_reconnect(&shutdown, consecutive_failures).await {
            break;
        }
    }
}

/// Returns false when shutdown fired during the wait.
async fn wait_before_reconnect(shutdown: &CancellationToken, failures: u32) -> bool {
    let delay = if failures > 1 {
        RECONNECT_DELAY_MAX
    } else {
        RECONNECT_DELAY
    };
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
