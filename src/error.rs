use thiserror::Error;

/// Crate-wide error type. Errors never cross the public API as panics from
/// I/O or protocol paths; they collapse into a `DisconnectReason` at the
/// channel and are surfaced via events, or (for config loading) returned
/// synchronously to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("handshake did not complete within the configured timeout")]
    HandshakeTimeout,

    #[error("ack not received within the configured timeout")]
    AckTimeout,

    #[error("peer requested shutdown")]
    PeerShutdown,

    #[error("local shutdown requested")]
    LocalShutdown,

    #[error("queue closed")]
    QueueClosed,

    #[error("no channel is routed for the requested node id")]
    RouteUnknown,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the optional TOML configuration loader, mirroring this
/// codebase's usual `ConfigError` two-stage (parse, then validate) shape.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid value for '{0}': {1}")]
    InvalidValue(String, String),
}

/// Why a channel left `Connected`/`AwaitingAck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `Socket::disconnect` was called for this binding.
    Requested,
    /// An I/O error on the underlying TCP stream.
    Socket,
    /// No ack arrived within `Ack.Timeout`.
    AckTimeout,
    /// The peer's Initialize letter never arrived within
    /// `Initialization.Timeout`.
    Handshake,
    /// The peer sent a Shutdown letter.
    Remote,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::Socket => "socket",
            DisconnectReason::AckTimeout => "ack_timeout",
            DisconnectReason::Handshake => "handshake",
            DisconnectReason::Remote => "remote",
        };
        f.write_str(s)
    }
}
