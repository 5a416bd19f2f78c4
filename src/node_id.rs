use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A 16-byte opaque identifier a socket advertises during handshake and
/// that peers use to key the reply-routing map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 16]);

impl NodeId {
    pub const SIZE: usize = 16;

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// A fresh, process-unique id, minted the same way this codebase
    /// mints any other unique-identity value: `uuid::Uuid::new_v4()`.
    /// Not authentication — the wire carries none.
    pub fn random() -> Self {
        NodeId(*uuid::Uuid::new_v4().as_bytes())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Counter-seeded xorshift64, mixed with a wall-clock seed and a
/// process-local monotonic counter. Used only for reconnect backoff
/// jitter, where speed matters and quality doesn't — unique-identity
/// values (`NodeId`, `LetterId`) go through `uuid` instead.
fn next_u64() -> u64 {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E3779B97F4A7C15);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut x = seed ^ count.wrapping_mul(0x2545_F491_4F6C_DD1D);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// A random `f64` in `[0, 1)`, used for backoff jitter.
pub(crate) fn next_unit_f64() -> f64 {
    // Use the top 53 bits for a uniform double in [0, 1).
    (next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
