//! Hand-rolled wire encode/decode for tests that need to play an
//! uncooperative peer (one that skips the Ack reply, or hangs up mid
//! connection) — cases the public `Socket` API can't express on its
//! own. Mirrors the frame layout documented at the top of `src/wire.rs`,
//! kept deliberately separate from it so these tests exercise the crate
//! only through real bytes on a real loopback socket.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const OPT_ACK: u8 = 0b0000_0001;
pub const OPT_NO_ACK: u8 = 0b0010_0000;

pub const TYPE_INITIALIZE: u8 = 1;
pub const TYPE_USER: u8 = 4;
pub const TYPE_ACK: u8 = 8;

/// A decoded frame, loose enough for assertions without pulling in the
/// crate's own `Letter` type.
pub struct RawFrame {
    pub options: u8,
    pub letter_type: u8,
    pub id: Option<[u8; 16]>,
}

fn needs_id(options: u8) -> bool {
    options & OPT_ACK != 0 || options & 0b0100_0000 != 0
}

pub fn encode_initialize(node_id: [u8; 16]) -> Vec<u8> {
    let mut body = vec![OPT_NO_ACK, TYPE_INITIALIZE];
    body.extend_from_slice(&1u16.to_le_bytes()); // parts_count
    body.push(1); // PartType::NodeId
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&node_id);
    frame(body)
}

pub fn encode_ack(id: [u8; 16]) -> Vec<u8> {
    let mut body = vec![OPT_ACK, TYPE_ACK];
    body.extend_from_slice(&id);
    body.extend_from_slice(&0u16.to_le_bytes());
    frame(body)
}

fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Read exactly one frame off `stream`, returning its header fields.
/// Part bytes are consumed but not retained — callers only need to know
/// what arrived, not its payload.
pub async fn read_frame(stream: &mut TcpStream) -> std::io::Result<RawFrame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let total_len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; total_len];
    stream.read_exact(&mut body).await?;

    let options = body[0];
    let letter_type = body[1];
    let mut pos = 2;
    let id = if needs_id(options) {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&body[pos..pos + 16]);
        pos += 16;
        Some(bytes)
    } else {
        None
    };
    let _parts_count = u16::from_le_bytes([body[pos], body[pos + 1]]);

    Ok(RawFrame { options, letter_type, id })
}

/// Perform the server side of the handshake: read the peer's Initialize
/// frame (ignored beyond that it arrived) and write back our own.
pub async fn raw_handshake(stream: &mut TcpStream, our_node_id: [u8; 16]) -> std::io::Result<()> {
    let frame = read_frame(stream).await?;
    assert_eq!(frame.letter_type, TYPE_INITIALIZE);
    stream.write_all(&encode_initialize(our_node_id)).await
}

pub fn node_id_bytes(n: u8) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[0] = n;
    id
}

/// Force an abortive close (RST) rather than a graceful FIN, so a peer's
/// in-flight write fails promptly instead of succeeding against a
/// half-closed socket.
pub fn kill_with_reset(stream: TcpStream) {
    let _ = stream.set_linger(Some(std::time::Duration::from_secs(0)));
    drop(stream);
}
