pub mod config;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod show;

pub use config::{NetworkConfig, ShowConfig};
pub use protocol::{Envelope, Message, MessageKind, NodeId, Origin, Role};
pub use receiver::{MessageHandler, NetworkService};
pub use registry::{Node, NodeRegistry};
pub use sender::Sender;
pub use show::{AudioCue, Phase, Sequence, SequenceTable, ShowController, ShowError};

/// Error type for the commander socket
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a collaborator outside the coordinator, such as audio.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;
