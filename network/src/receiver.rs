use crate::config::NetworkConfig;
use crate::protocol::{Envelope, Message, Origin, Role, MAX_DATAGRAM_SIZE};
use crate::registry::{Node, NodeRegistry};
use crate::sender::Sender;
use crate::Result;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Receives every message accepted from a node.
///
/// Called on the receive loop, so implementations must return promptly.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, node: &Node, message: Message);
}

/// Owns the commander socket: the send path and the receive loop.
pub struct NetworkService {
    socket: Arc<UdpSocket>,
    sender: Sender,
    registry: NodeRegistry,
    cancellation_token: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkService {
    /// Binds the commander socket. This is the only fatal operation of the
    /// coordinator.
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind()).await?;
        socket.set_broadcast(true)?;
        let socket = Arc::new(socket);
        info!("Listening on {}", socket.local_addr()?);

        Ok(Self {
            sender: Sender::new(socket.clone(), config.broadcast()),
            registry: NodeRegistry::new(config.node_port),
            socket,
            cancellation_token: CancellationToken::new(),
            receive_task: Mutex::default(),
        })
    }

    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn registry(&self) -> NodeRegistry {
        self.registry.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns the receive loop. Calling it again while a loop is running has
    /// no effect.
    pub fn start(&self, handler: Arc<dyn MessageHandler>) {
        let mut task = self
            .receive_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            warn!("Receive loop already running");
            return;
        }

        *task = Some(tokio::spawn(
            receive_loop(
                self.socket.clone(),
                self.registry.clone(),
                handler,
                self.cancellation_token.clone(),
            )
            .instrument(info_span!("receiver")),
        ));
    }

    /// Stops the receive loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let task = self
            .receive_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Receive loop ended abnormally: {e}");
            }
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    registry: NodeRegistry,
    handler: Arc<dyn MessageHandler>,
    cancellation_token: CancellationToken,
) {
    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = select! {
            _ = cancellation_token.cancelled() => {
                debug!("Receive loop stopped");
                return;
            }
            received = socket.recv_from(&mut buffer) => match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Error receiving message: {e}");
                    continue;
                }
            }
        };
        trace!("Received message from {from}, length {len}");

        let envelope = match Envelope::decode(&buffer[..len], Role::Node) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!("Dropping datagram from {from}: {e}");
                continue;
            }
        };
        let Origin::Node(id) = envelope.origin else {
            continue;
        };

        let node = registry.lookup_or_register(id, from.ip());
        handler.handle(&node, envelope.message);
    }
}
