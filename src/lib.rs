//! Point-to-point and multi-peer TCP messaging: peers hold bidirectional
//! connections over which they exchange self-delimited framed messages
//! ("letters") with optional acknowledgement, multicast fan-out,
//! batching, and requeue-on-failure.
//!
//! The core surface is [`Socket`]: bind listening endpoints, connect to
//! peers, enqueue [`Letter`]s, and observe delivery outcomes through
//! [`SocketEvent`]s.

mod batch_channel;
mod binding;
mod channel;
mod channel_like;
mod config;
mod dispatcher;
mod error;
mod establish;
mod event;
mod heartbeat;
mod id;
mod letter;
mod listener;
mod node_id;
mod socket;
mod wire;

pub use binding::Binding;
pub use config::{load_config_from_path, load_config_from_str, Config, ConfigBuilder};
pub use error::{ConfigError, DisconnectReason, Error, Result};
pub use event::SocketEvent;
pub use id::LetterId;
pub use letter::{Letter, LetterType, Options, Part, PartType};
pub use node_id::NodeId;
pub use socket::Socket;
