//! CLI commands for the node
//!
//! Runs a connection manager with a peer server that accepts everyone and
//! logs what happens on each connection.

use crate::network::{
    CloseInfo, ConnManConfig, Connection, ConnectionManager, ConnectionObserver, EndpointAddress,
    ErrorCode, PeerData, PeerServer,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Traffic counters kept by [`LogPeerServer`]
#[derive(Debug, Default)]
pub struct NodeStats {
    pub accepted: AtomicU64,
    pub failed_connects: AtomicU64,
    pub closed: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// Peer server that starts reading every inbound connection and logs
/// lifecycle events
#[derive(Debug, Default)]
pub struct LogPeerServer {
    stats: NodeStats,
}

impl LogPeerServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }
}

impl PeerServer for LogPeerServer {
    fn authenticate(&self, connection: Arc<Connection>) {
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        log::info!("Accepted {}", connection);
        connection.start_read();
    }

    fn on_failed_connect(&self, address: EndpointAddress, error: ErrorCode) {
        self.stats.failed_connects.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "Failed to connect to {}: {} (code {})",
            address,
            error,
            error.code()
        );
    }
}

impl ConnectionObserver for LogPeerServer {
    fn on_connected(&self, connection: &Arc<Connection>) {
        log::info!("Connected {}", connection);
    }

    fn on_message(&self, connection: &Arc<Connection>, data: &[u8]) {
        self.stats
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        log::debug!("{} bytes from {}", data.len(), connection);
    }

    fn on_close(&self, connection: &Arc<Connection>, info: CloseInfo) {
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Disconnected {}: {} (code {})",
            connection,
            info.error,
            info.error.code()
        );
    }
}

/// Render a peer list for the terminal
pub fn format_peers(peers: &[PeerData]) -> String {
    if peers.is_empty() {
        return "   No peers connected.".to_string();
    }

    peers
        .iter()
        .map(|p| {
            format!(
                "   {} {} since {}{}",
                if p.inbound { "<-" } else { "->" },
                p.peer,
                p.created_at.format("%Y-%m-%d %H:%M:%S"),
                if p.connected { "" } else { " (connecting)" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Start a node, dial `targets`, and run until Ctrl+C
pub async fn cmd_start(config: ConnManConfig, targets: &[EndpointAddress]) -> CliResult<()> {
    let server = Arc::new(LogPeerServer::new());
    let isolated = config.isolated;
    let manager = ConnectionManager::start(config, server.clone(), server.clone())?;

    println!("🌐 Node listening on {}", manager.bind_address());
    if isolated {
        println!("   🔒 Isolated: inbound connections are dropped");
    }

    for target in targets {
        println!("   🔗 Connecting to {}...", target);
        manager.connect(*target);
    }

    tokio::signal::ctrl_c().await?;
    println!("\n📴 Shutting down node...");

    if let Some(peers) = manager.peers().await {
        println!("📋 Peers at shutdown ({}):", peers.len());
        println!("{}", format_peers(&peers));
        log::debug!("Peer snapshot: {}", serde_json::to_string(&peers)?);
    }

    manager.shutdown(ErrorCode::SHUTDOWN);
    let joined = manager.clone();
    tokio::task::spawn_blocking(move || joined.join()).await?;

    let stats = server.stats();
    println!("✅ Node stopped");
    println!(
        "   Accepted: {}, failed connects: {}, closed: {}, received: {} bytes",
        stats.accepted.load(Ordering::Relaxed),
        stats.failed_connects.load(Ordering::Relaxed),
        stats.closed.load(Ordering::Relaxed),
        stats.bytes_received.load(Ordering::Relaxed)
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[test]
    fn test_format_peers() {
        assert_eq!(format_peers(&[]), "   No peers connected.");

        let peers = vec![
            PeerData {
                peer: "10.0.0.1:9186".parse().unwrap(),
                created_at: Utc::now(),
                inbound: true,
                connected: true,
            },
            PeerData {
                peer: "10.0.0.2:9186".parse().unwrap(),
                created_at: Utc::now(),
                inbound: false,
                connected: false,
            },
        ];
        let text = format_peers(&peers);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("<- 10.0.0.1:9186"));
        assert!(lines[1].contains("-> 10.0.0.2:9186"));
        assert!(lines[1].ends_with("(connecting)"));
    }

    #[tokio::test]
    async fn test_log_peer_server_reads_inbound() {
        let server = Arc::new(LogPeerServer::new());
        let config = ConnManConfig::new("127.0.0.1:0".parse().unwrap());
        let manager = ConnectionManager::start(config, server.clone(), server.clone()).unwrap();

        let mut client = TcpStream::connect(manager.bind_address().socket_addr())
            .await
            .unwrap();
        client.write_all(b"payload").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while server.stats().bytes_received.load(Ordering::Relaxed) < 7 {
            assert!(tokio::time::Instant::now() < deadline, "no data received");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.stats().accepted.load(Ordering::Relaxed), 1);

        manager.shutdown(ErrorCode::SHUTDOWN);
        let joined = manager.clone();
        tokio::task::spawn_blocking(move || joined.join())
            .await
            .unwrap();
        assert_eq!(server.stats().closed.load(Ordering::Relaxed), 1);
    }
}
