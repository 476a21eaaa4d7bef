use crate::{Magic, Packet, PacketType, ProtocolError, Result, HEADER_SIZE, MAX_PACKET_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for Gearman binary packets
///
/// Frame format: [4-byte magic] [4-byte type (big-endian)] [4-byte body length (big-endian)] [body]
///
/// The body holds the packet arguments separated by NUL bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Read header without consuming
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[0..4]);
        let magic = Magic::from_bytes(magic)?;

        let mut word = [0u8; 4];
        word.copy_from_slice(&src[4..8]);
        let raw_type = u32::from_be_bytes(word);
        word.copy_from_slice(&src[8..12]);
        let length = u32::from_be_bytes(word) as usize;

        if length > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(length));
        }

        let kind = PacketType::from_u32(raw_type).ok_or(ProtocolError::UnknownPacketType(raw_type))?;

        // Wait for complete packet
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(length).freeze();
        let args = split_args(kind, body)?;

        Ok(Some(Packet { magic, kind, args }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let expected = item.kind.arg_count();
        if item.args.len() != expected {
            return Err(ProtocolError::ArgumentCount {
                kind: item.kind,
                expected,
                actual: item.args.len(),
            });
        }

        // Only the trailing argument may carry NUL bytes
        if let Some((_, leading)) = item.args.split_last() {
            if leading.iter().any(|arg| arg.contains(&0)) {
                return Err(ProtocolError::InvalidArgument(format!(
                    "{:?} argument contains a NUL byte",
                    item.kind
                )));
            }
        }

        let length = item.body_len();
        if length > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(length));
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&item.magic.as_bytes());
        dst.put_u32(item.kind.as_u32());
        dst.put_u32(length as u32);

        for (i, arg) in item.args.iter().enumerate() {
            if i > 0 {
                dst.put_u8(0);
            }
            dst.put_slice(arg);
        }

        Ok(())
    }
}

fn split_args(kind: PacketType, mut body: Bytes) -> Result<Vec<Bytes>> {
    let count = kind.arg_count();
    if count == 0 {
        if !body.is_empty() {
            return Err(ProtocolError::InvalidArgument(format!(
                "{:?} carries an unexpected {} byte body",
                kind,
                body.len()
            )));
        }
        return Ok(Vec::new());
    }

    let mut args = Vec::with_capacity(count);
    for found in 0..count - 1 {
        let nul = body.iter().position(|b| *b == 0).ok_or(ProtocolError::ArgumentCount {
            kind,
            expected: count,
            actual: found + 1,
        })?;
        args.push(body.split_to(nul));
        body.advance(1);
    }
    args.push(body);

    Ok(args)
}
