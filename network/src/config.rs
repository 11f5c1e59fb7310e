use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address the commander socket binds to.
    pub bind_address: IpAddr,
    pub commander_port: u16,
    /// Port every node listens on, for unicast and broadcast alike.
    pub node_port: u16,
    pub broadcast_address: IpAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            commander_port: 1224,
            node_port: 1225,
            broadcast_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 255)),
        }
    }
}

impl NetworkConfig {
    pub fn bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.commander_port)
    }

    pub fn broadcast(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.node_port)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShowConfig {
    /// Time nodes get to load their animation between PREPARE and START.
    pub settle_delay_ms: u64,
    /// Seconds subtracted from a sequence's cue point before audio starts.
    pub lead_time_seconds: f32,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            lead_time_seconds: 5.0,
        }
    }
}

impl ShowConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
