use crate::id::LetterId;

/// What kind of letter this is. These numeric codes are the wire
/// representation, not just a Rust-side tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LetterType {
    Initialize = 1,
    Shutdown = 2,
    User = 4,
    Ack = 8,
    Heartbeat = 16,
    Batch = 32,
}

impl LetterType {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => LetterType::Initialize,
            2 => LetterType::Shutdown,
            4 => LetterType::User,
            8 => LetterType::Ack,
            16 => LetterType::Heartbeat,
            32 => LetterType::Batch,
            _ => return None,
        })
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }
}

bitflags::bitflags! {
    /// Per-letter option bits. `bitflags` is the idiomatic way to model a
    /// wire bitset in Rust without hand-rolling bit twiddling — see
    /// DESIGN.md for why it's pulled in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Options: u8 {
        const ACK            = 0b0000_0001;
        const SILENT_ACK      = 0b0000_0010;
        const MULTICAST       = 0b0000_0100;
        const REQUEUE         = 0b0000_1000;
        const SILENT_DISCARD  = 0b0001_0000;
        const NO_ACK          = 0b0010_0000;
        const UNIQUE_ID       = 0b0100_0000;
    }
}

impl Options {
    /// An id must be assigned whenever `Ack` or `UniqueId` is requested.
    pub fn needs_id(self) -> bool {
        self.contains(Options::ACK) || self.contains(Options::UNIQUE_ID)
    }

    /// Whether the sender wants a per-letter ack reply once delivered.
    pub fn wants_ack(self) -> bool {
        self.contains(Options::ACK) && !self.contains(Options::NO_ACK)
    }
}

/// What a `Part`'s bytes mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartType {
    User = 0,
    NodeId = 1,
    Batch = 2,
}

impl PartType {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => PartType::User,
            1 => PartType::NodeId,
            2 => PartType::Batch,
            _ => return None,
        })
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }
}

/// One ordered byte blob inside a letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub part_type: PartType,
    pub bytes: Vec<u8>,
}

impl Part {
    pub fn user(bytes: impl Into<Vec<u8>>) -> Self {
        Part {
            part_type: PartType::User,
            bytes: bytes.into(),
        }
    }

    pub fn node_id(node_id: crate::node_id::NodeId) -> Self {
        Part {
            part_type: PartType::NodeId,
            bytes: node_id.as_bytes().to_vec(),
        }
    }

    pub fn batch(serialized_letter: Vec<u8>) -> Self {
        Part {
            part_type: PartType::Batch,
            bytes: serialized_letter,
        }
    }
}

/// The unit of application message: a typed, option-bearing, multi-part
/// byte container. Immutable after enqueue — nothing in this crate hands
/// back a `&mut Letter` once it has been handed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    pub letter_type: LetterType,
    pub options: Options,
    id: Option<LetterId>,
    pub parts: Vec<Part>,
}

impl Letter {
    pub fn new(letter_type: LetterType, options: Options, parts: Vec<Part>) -> Self {
        let mut letter = Letter {
            letter_type,
            options,
            id: None,
            parts,
        };
        if options.needs_id() {
            letter.id = Some(crate::id::IdFactory::new().next());
        }
        letter
    }

    /// Build a user letter, assigning an id only if the options demand one
    /// (lazily, when Ack or UniqueId is requested).
    pub fn user(options: Options, parts: Vec<Part>) -> Self {
        Letter::new(LetterType::User, options, parts)
    }

    pub fn id(&self) -> Option<LetterId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: LetterId) {
        self.id = Some(id);
    }

    pub(crate) fn ensure_id(&mut self) -> LetterId {
        if self.id.is_none() {
            self.id = Some(crate::id::IdFactory::new().next());
        }
        self.id.unwrap()
    }

    /// Reconstruct a letter decoded off the wire. The id is whatever the
    /// frame carried (absent unless `Ack`/`UniqueId` was set).
    pub(crate) fn from_wire(
        letter_type: LetterType,
        options: Options,
        id: Option<LetterId>,
        parts: Vec<Part>,
    ) -> Self {
        Letter {
            letter_type,
            options,
            id,
            parts,
        }
    }

    pub(crate) fn initialize(local_node_id: crate::node_id::NodeId) -> Self {
        Letter {
            letter_type: LetterType::Initialize,
            options: Options::NO_ACK,
            id: None,
            parts: vec![Part::node_id(local_node_id)],
        }
    }

    pub(crate) fn shutdown() -> Self {
        Letter {
            letter_type: LetterType::Shutdown,
            options: Options::NO_ACK,
            id: None,
            parts: vec![],
        }
    }

    pub(crate) fn heartbeat() -> Self {
        Letter {
            letter_type: LetterType::Heartbeat,
            options: Options::NO_ACK,
            id: None,
            parts: vec![],
        }
    }

    pub(crate) fn ack(id: LetterId) -> Self {
        Letter {
            letter_type: LetterType::Ack,
            // The wire format keys id-presence off the Ack/UniqueId bits
            // (see wire.rs), and an ack reply is pointless without its id.
            options: Options::ACK,
            id: Some(id),
            parts: vec![],
        }
    }

    /// Wrap a batch of already-serialized letters into one Batch letter.
    /// Batch letters always carry `NoAck` — acks inside a batch are never
    /// honored on the wire (see the open question recorded in DESIGN.md).
    pub(crate) fn batch(serialized_inner: Vec<Vec<u8>>) -> Self {
        Letter {
            letter_type: LetterType::Batch,
            options: Options::NO_ACK,
            id: None,
            parts: serialized_inner.into_iter().map(Part::batch).collect(),
        }
    }

    /// The single NodeId part of an Initialize letter, if this is one and
    /// it is well-formed.
    pub(crate) fn initialize_node_id(&self) -> Option<crate::node_id::NodeId> {
        if self.letter_type != LetterType::Initialize || self.parts.len() != 1 {
            return None;
        }
        let part = &self.parts[0];
        if part.part_type != PartType::NodeId || part.bytes.len() != 16 {
            return None;
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&part.bytes);
        Some(crate::node_id::NodeId::from_bytes(bytes))
    }
}
