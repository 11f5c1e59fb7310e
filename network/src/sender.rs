use crate::protocol::{Envelope, Message, Origin};
use crate::registry::Node;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// Outbound half of the commander socket.
#[derive(Clone)]
pub struct Sender {
    socket: Arc<UdpSocket>,
    broadcast: SocketAddr,
}

impl Sender {
    pub(crate) fn new(socket: Arc<UdpSocket>, broadcast: SocketAddr) -> Self {
        Self { socket, broadcast }
    }

    pub async fn broadcast(&self, message: Message) -> Result<()> {
        self.send_to(message, self.broadcast).await
    }

    pub async fn unicast(&self, node: &Node, message: Message) -> Result<()> {
        self.send_to(message, node.address).await
    }

    async fn send_to(&self, message: Message, target: SocketAddr) -> Result<()> {
        trace!("Sending {message:?} to {target}");
        let datagram = Envelope::new(Origin::Commander, message).encode();
        self.socket.send_to(&datagram, target).await?;
        Ok(())
    }
}
