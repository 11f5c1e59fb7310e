use show_network::{Message, MessageKind, NodeId};
use tracing::{info, warn};

/// The protocol side of a display node, without any pixels: remembers the
/// animation it was asked to load and answers the commander.
pub struct DisplayNode {
    id: NodeId,
    acknowledge: bool,
    animation: Option<String>,
    running: bool,
}

impl DisplayNode {
    pub fn new(id: NodeId, acknowledge: bool) -> Self {
        Self {
            id,
            acknowledge,
            animation: None,
            running: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sent once at startup so the commander learns our address.
    pub fn announce(&self) -> Message {
        Message::debug(format!("node {} online", self.id))
    }

    /// Replies owed to the commander for `message`.
    pub fn handle(&mut self, message: Message) -> Vec<Message> {
        match message.kind {
            MessageKind::Prepare if message.payload.is_empty() => {
                warn!("PREPARE without animation");
                vec![]
            }
            MessageKind::Prepare => {
                info!("Loading {}", message.payload);
                self.running = false;
                let loaded = Message::debug(format!("loaded {}", message.payload));
                self.animation = Some(message.payload);
                if self.acknowledge {
                    vec![Message::prepared(), loaded]
                } else {
                    vec![loaded]
                }
            }
            MessageKind::Start => match &self.animation {
                Some(animation) => {
                    info!("Playing {animation}");
                    self.running = true;
                    vec![Message::debug(format!("playing {animation}"))]
                }
                None => vec![Message::debug("START without animation")],
            },
            MessageKind::Stop => {
                if self.running {
                    info!("Stopped");
                }
                self.running = false;
                vec![]
            }
            MessageKind::Debug => vec![],
        }
    }
}
