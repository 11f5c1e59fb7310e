use bytes::{BufMut, BytesMut};
use std::fmt::{Debug, Display, Formatter};

/// First byte of every datagram belonging to the show protocol.
pub const PROGRAM_MARKER: u8 = 12;

/// Largest datagram the receive loop will read.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Node = 24,
    Commander = 25,
}

impl Role {
    fn from_byte(byte: u8) -> Option<Role> {
        match byte {
            24 => Some(Role::Node),
            25 => Some(Role::Commander),
            _ => None,
        }
    }
}

/// Identifier of a display node. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    pub fn new(id: u8) -> Option<NodeId> {
        (id != 0).then_some(NodeId(id))
    }

    /// Animation slot `0` of a sequence belongs to node `1`, and so on.
    pub fn from_slot(slot: usize) -> Option<NodeId> {
        u8::try_from(slot + 1).ok().and_then(NodeId::new)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Prepare = 1,
    Start = 2,
    Stop = 3,
    Debug = 4,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::Prepare),
            2 => Ok(MessageKind::Start),
            3 => Ok(MessageKind::Stop),
            4 => Ok(MessageKind::Debug),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn prepare(animation: impl Into<String>) -> Self {
        Self::new(MessageKind::Prepare, animation)
    }

    pub fn prepared() -> Self {
        Self::new(MessageKind::Prepare, String::new())
    }

    pub fn start() -> Self {
        Self::new(MessageKind::Start, String::new())
    }

    pub fn stop() -> Self {
        Self::new(MessageKind::Stop, String::new())
    }

    pub fn debug(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Debug, text)
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}({:?})", self.kind, self.payload)
        }
    }
}

/// Who put a message on the wire. Node frames carry the sender's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Commander,
    Node(NodeId),
}

impl Origin {
    pub fn role(&self) -> Role {
        match self {
            Origin::Commander => Role::Commander,
            Origin::Node(_) => Role::Node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: Origin,
    pub message: Message,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("foreign program marker {0}")]
    ForeignProgram(u8),
    #[error("unexpected role marker {0}")]
    UnexpectedRole(u8),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("reserved node id")]
    ReservedNodeId,
}

impl Envelope {
    pub fn new(origin: Origin, message: Message) -> Self {
        Self { origin, message }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(4 + self.message.payload.len());
        buffer.put_u8(PROGRAM_MARKER);
        buffer.put_u8(self.origin.role() as u8);
        if let Origin::Node(id) = self.origin {
            buffer.put_u8(id.get());
        }
        buffer.put_u8(self.message.kind as u8);
        buffer.put_slice(self.message.payload.as_bytes());
        buffer
    }

    /// Decodes a datagram sent by a peer of role `expected`. Anything else,
    /// including our own broadcast echo, is rejected.
    pub fn decode(datagram: &[u8], expected: Role) -> Result<Envelope, DecodeError> {
        let header_len = match expected {
            Role::Commander => 3,
            Role::Node => 4,
        };
        if datagram.len() < header_len {
            return Err(DecodeError::TooShort(datagram.len()));
        }
        if datagram[0] != PROGRAM_MARKER {
            return Err(DecodeError::ForeignProgram(datagram[0]));
        }
        if Role::from_byte(datagram[1]) != Some(expected) {
            return Err(DecodeError::UnexpectedRole(datagram[1]));
        }

        let origin = match expected {
            Role::Commander => Origin::Commander,
            Role::Node => Origin::Node(NodeId::new(datagram[2]).ok_or(DecodeError::ReservedNodeId)?),
        };
        let kind = MessageKind::try_from(datagram[header_len - 1])?;
        let payload = String::from_utf8_lossy(&datagram[header_len..]).into_owned();

        Ok(Envelope {
            origin,
            message: Message { kind, payload },
        })
    }
}
