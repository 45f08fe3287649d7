use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use clap::Parser;

use crate::room::RoomConfig;

/// Multiplayer falling-block party server.
#[derive(Parser, Debug, Clone)]
#[command(name = "tetrisparty-server", version)]
pub struct ServerConfig {
    /// Interface to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port for websocket connections
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,
    /// Base URL players reach the server at; join links are built from it
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,
    /// Fixed match seed, for reproducible piece sequences
    #[arg(long, env = "TETRIS_SEED")]
    pub seed: Option<u64>,
    /// How long a lobby slot is held after its controller drops
    #[arg(long, env = "RECONNECT_GRACE_MS", default_value_t = 30_000)]
    pub reconnect_grace_ms: u64,
    /// Rooms without inbound traffic for this long are closed
    #[arg(long, env = "ROOM_IDLE_TIMEOUT_MS", default_value_t = 30 * 60 * 1000)]
    pub room_idle_timeout_ms: u64,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base for join links. An unspecified bind address is replaced by the
    /// machine's LAN address so phones on the same network can follow it.
    pub fn public_url(&self) -> String {
        self.public_url_with(lan_address())
    }

    fn public_url_with(&self, lan: Option<IpAddr>) -> String {
        if let Some(url) = &self.public_url {
            return url.trim_end_matches('/').to_string();
        }
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" => match lan {
                Some(IpAddr::V6(ip)) => format!("[{ip}]"),
                Some(ip) => ip.to_string(),
                None => "localhost".to_string(),
            },
            host => host.to_string(),
        };
        format!("http://{}:{}", host, self.port)
    }

    /// Join links will only work on this machine.
    pub fn is_local_only(&self) -> bool {
        let url = self.public_url();
        url.contains("://localhost") || url.contains("://127.") || url.contains("://[::1]")
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            public_url: self.public_url(),
            seed: self.seed,
            reconnect_grace: Duration::from_millis(self.reconnect_grace_ms),
            idle_timeout: Duration::from_millis(self.room_idle_timeout_ms),
        }
    }
}

// Connecting a UDP socket sends nothing; it only makes the OS pick the
// outbound interface.
fn lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}
