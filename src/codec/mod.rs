#![forbid(unsafe_code)]
//! Protobuf binary RDF: terms, triples, quads, streams and result rows.
//!
//! This path is independent of the store; it is used for import, export and
//! result exchange.

use std::io::{ErrorKind, Read, Write};

use prost::Message;

use crate::types::{Result, TdbError};

pub mod convert;
pub mod prefix;
pub mod proto;
pub mod rows;
pub mod stream;

pub use convert::{
    format_double, from_wire, from_wire_opt, quad_from_wire, quad_to_wire, to_wire, to_wire_opt, triple_from_wire,
    triple_to_wire, TermDecoder,
};
pub use prefix::PrefixMap;
pub use rows::{ResultRowReader, ResultRowWriter};
pub use stream::{
    read_stream_message, write_stream_message, ProtobufStreamReader, ProtobufStreamWriter, StreamCollector, StreamRdf,
};

/// Largest delimited message accepted on read.
const MAX_MESSAGE_LEN: u64 = 64 << 20;

/// Writes `message` preceded by its varint length.
pub(crate) fn write_delimited<M: Message, W: Write>(out: &mut W, message: &M) -> Result<()> {
    out.write_all(&message.encode_length_delimited_to_vec())?;
    Ok(())
}

/// Reads one length-delimited message; `None` at a clean end of input.
pub(crate) fn read_delimited<M: Message + Default, R: Read>(input: &mut R, scratch: &mut Vec<u8>) -> Result<Option<M>> {
    let Some(len) = read_varint(input)? else {
        return Ok(None);
    };
    if len > MAX_MESSAGE_LEN {
        return Err(TdbError::encoding(format!("delimited message of {len} bytes")));
    }
    scratch.clear();
    scratch.resize(len as usize, 0);
    input.read_exact(scratch)?;
    Ok(Some(M::decode(scratch.as_slice())?))
}

fn read_varint<R: Read>(input: &mut R) -> Result<Option<u64>> {
    let mut value = 0u64;
    for (pos, shift) in (0..64).step_by(7).enumerate() {
        let mut byte = [0u8; 1];
        match input.read_exact(&mut byte) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof && pos == 0 => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(TdbError::encoding("length prefix overflows 64 bits"))
}
