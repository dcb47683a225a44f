//! # Packet Framing
//!
//! Tokio codec for reading and writing R2 frames over a byte stream.
//!
//! A frame starts with its own little-endian `u16` length (header included),
//! so the decoder waits for two bytes, then for the full declared frame, and
//! hands the exact slice to [`Packet::from_bytes`]. The encoder emits
//! [`Packet::to_bytes`] as one contiguous write.
//!
//! End-of-stream at a frame boundary is a clean disconnect; EOF mid-frame
//! surfaces as an error from `decode_eof`. A declared length smaller than the
//! header is malformed and fatal to the session.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{Packet, HEADER_LEN};
use crate::error::NetError;

/// Codec for length-prefixed R2 packets.
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, NetError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if length < HEADER_LEN {
            return Err(NetError::LengthMismatch {
                declared: length as u16,
                actual: src.len(),
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        Packet::from_bytes(&frame).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = NetError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), NetError> {
        let bytes = packet.to_bytes()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
