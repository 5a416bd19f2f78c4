//! The wire frame and its codec.
//!
//! ```text
//! total_length:u32_le
//! options:u8
//! type:u8
//! id:16 bytes            (present iff options has Ack or UniqueId)
//! parts_count:u16_le
//! for each part:
//!     part_type:u8
//!     part_length:u32_le
//!     bytes
//! ```
//!
//! `total_length` covers everything after itself. Byte order is
//! little-endian throughout. `LetterCodec` plugs into
//! `tokio_util::codec::Framed` the way framed codecs are wired up
//! elsewhere in this ecosystem (see DESIGN.md) — it only decides whether a
//! frame is complete; `Channel` decides what to do with the result.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::id::LetterId;
use crate::letter::{Letter, LetterType, Options, Part, PartType};

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Default)]
pub struct LetterCodec;

impl Decoder for LetterCodec {
    type Item = Letter;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Letter>, Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let total_length = u32::from_le_bytes(src[..LENGTH_PREFIX_SIZE].try_into().unwrap()) as usize;

        if total_length > MAX_FRAME_BODY_SIZE {
            return Err(Error::MalformedFrame(format!(
                "frame body of {total_length} bytes exceeds the {MAX_FRAME_BODY_SIZE} byte cap"
            )));
        }

        if src.len() < LENGTH_PREFIX_SIZE + total_length {
            src.reserve(LENGTH_PREFIX_SIZE + total_length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(total_length);
        decode_body(&body).map(Some)
    }
}

impl Encoder<Letter> for LetterCodec {
    type Error = Error;

    fn encode(&mut self, letter: Letter, dst: &mut BytesMut) -> Result<(), Error> {
        let body = encode_body(&letter);
        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Encoder<&Letter> for LetterCodec {
    type Error = Error;

    fn encode(&mut self, letter: &Letter, dst: &mut BytesMut) -> Result<(), Error> {
        let body = encode_body(letter);
        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

/// A generous but finite cap on a single frame's body, so a corrupted or
/// hostile length prefix can't make the decoder try to buffer gigabytes
/// before reporting `MalformedFrame`.
const MAX_FRAME_BODY_SIZE: usize = 64 * 1024 * 1024;

fn encode_body(letter: &Letter) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u8(letter.options.bits()).unwrap();
    body.write_u8(letter.letter_type.code()).unwrap();

    if letter.options.needs_id() {
        let id = letter.id().expect("needs_id() implies an id was assigned");
        body.extend_from_slice(&id.to_be_bytes());
    }

    body.write_u16::<LittleEndian>(letter.parts.len() as u16).unwrap();
    for part in &letter.parts {
        body.write_u8(part.part_type.code()).unwrap();
        body.write_u32::<LittleEndian>(part.bytes.len() as u32).unwrap();
        body.extend_from_slice(&part.bytes);
    }

    body
}

fn decode_body(body: &[u8]) -> Result<Letter, Error> {
    let mut cursor = Cursor::new(body);

    let options_bits = read_u8(&mut cursor)?;
    let options = Options::from_bits(options_bits)
        .ok_or_else(|| Error::MalformedFrame(format!("unknown option bits: {options_bits:#010b}")))?;

    let type_code = read_u8(&mut cursor)?;
    let letter_type = LetterType::from_code(type_code)
        .ok_or_else(|| Error::MalformedFrame(format!("unknown letter type code: {type_code}")))?;

    let id = if options.needs_id() {
        let mut id_bytes = [0u8; 16];
        cursor
            .read_exact(&mut id_bytes)
            .map_err(|_| Error::MalformedFrame("truncated id".into()))?;
        Some(LetterId::from_be_bytes(id_bytes))
    } else {
        None
    };

    let parts_count = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| Error::MalformedFrame("truncated parts_count".into()))?;

    let mut parts = Vec::with_capacity(parts_count as usize);
    for _ in 0..parts_count {
        let part_type_code = read_u8(&mut cursor)?;
        let part_type = PartType::from_code(part_type_code)
            .ok_or_else(|| Error::MalformedFrame(format!("unknown part type code: {part_type_code}")))?;
        let part_length = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::MalformedFrame("truncated part_length".into()))? as usize;

        let start = cursor.position() as usize;
        let end = start
            .checked_add(part_length)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| Error::MalformedFrame("part length runs past end of frame".into()))?;

        parts.push(Part {
            part_type,
            bytes: body[start..end].to_vec(),
        });
        cursor.set_position(end as u64);
    }

    if cursor.position() as usize != body.len() {
        return Err(Error::MalformedFrame("trailing bytes after last part".into()));
    }

    Ok(Letter::from_wire(letter_type, options, id, parts))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    cursor
        .read_u8()
        .map_err(|_| Error::MalformedFrame("truncated frame".into()))
}

/// Serialize a letter into a standalone, self-delimited frame (length
/// prefix included). Used for the outer wire write path and for packing
/// inner letters into a Batch letter's Parts — each Part is itself a
/// fully-serialized letter, decoded recursively.
pub fn serialize_letter_frame(letter: &Letter) -> Vec<u8> {
    let body = encode_body(letter);
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    framed.write_u32::<LittleEndian>(body.len() as u32).unwrap();
    framed.extend_from_slice(&body);
    framed
}

/// Deserialize one letter from a standalone frame produced by
/// `serialize_letter_frame`, used to unpack a Batch letter's Parts.
pub fn deserialize_letter_frame(bytes: &[u8]) -> Result<Letter, Error> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(Error::MalformedFrame("batch part too short for a length prefix".into()));
    }
    let total_length = u32::from_le_bytes(bytes[..LENGTH_PREFIX_SIZE].try_into().unwrap()) as usize;
    let body = bytes
        .get(LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + total_length)
        .ok_or_else(|| Error::MalformedFrame("batch part length prefix overruns its bytes".into()))?;
    decode_body(body)
}

use std::io::Read;
