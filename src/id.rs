use std::fmt;

/// The 128-bit identifier assigned to a letter lazily, the first time its
/// options request `Ack` or `UniqueId`. Carried on the wire as 16
/// big-endian bytes (see `wire::LetterCodec`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LetterId(pub u128);

impl LetterId {
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        LetterId(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for LetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Generates letter ids via `uuid::Uuid::new_v4()`, the same construction
/// this codebase reaches for anywhere it needs a fresh unique identifier.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct IdFactory;

impl IdFactory {
    pub fn new() -> Self {
        IdFactory
    }

    pub fn next(&self) -> LetterId {
        LetterId(uuid::Uuid::new_v4().as_u128())
    }
}
