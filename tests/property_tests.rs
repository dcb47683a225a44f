//! Property-based tests using proptest
//!
//! These tests validate the packet codec invariants across randomly generated
//! inputs: length bookkeeping, wire roundtrips, obfuscation state toggling,
//! and framing at arbitrary stream split points.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use r2o_net::core::crypt;
use r2o_net::{Packet, PacketCodec};
use tokio_util::codec::Decoder;

/// Shared test key blob: 6 header bytes plus a body key that covers every
/// generated body. First `init` wins for the whole test process.
fn init_test_keys() {
    let mut blob = vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    blob.extend((0u32..4096).map(|i| (i as u8).wrapping_mul(31).wrapping_add(11)));
    crypt::init(&blob).expect("valid test blob");
}

// Property: length always counts the header plus the body
proptest! {
    #[test]
    fn prop_length_counts_header_and_body(body in prop::collection::vec(any::<u8>(), 0..1024)) {
        let packet = Packet::create(1, body.as_slice()).expect("create");
        prop_assert_eq!(packet.len() as usize, 6 + body.len());
    }
}

// Property: encode/decode roundtrip preserves id, num, encryption flag, body
proptest! {
    #[test]
    fn prop_wire_roundtrip(
        id in any::<u16>(),
        num in any::<u8>(),
        body in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let mut packet = Packet::create(id, body.as_slice()).expect("create");
        packet.num = num;

        let wire = packet.to_bytes().expect("encode");
        let decoded = Packet::from_bytes(&wire).expect("decode");

        prop_assert_eq!(decoded.id, id);
        prop_assert_eq!(decoded.num, num);
        prop_assert!(!decoded.is_encrypted());
        prop_assert_eq!(decoded.body(), body.as_slice());
    }
}

// Property: encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic(body in prop::collection::vec(any::<u8>(), 0..512)) {
        let packet = Packet::create(77, body.as_slice()).expect("create");
        prop_assert_eq!(packet.to_bytes().expect("encode"), packet.to_bytes().expect("encode"));
    }
}

// Property: a plaintext packet emits flag byte 0 and its body verbatim
proptest! {
    #[test]
    fn prop_plaintext_wire_verbatim(body in prop::collection::vec(any::<u8>(), 0..1024)) {
        let packet = Packet::create(42, body.as_slice()).expect("create");
        let wire = packet.to_bytes().expect("encode");

        prop_assert_eq!(wire[2], 0);
        prop_assert_eq!(&wire[6..], body.as_slice());
    }
}

// Property: encrypt/decrypt are no-ops when already in the target state
proptest! {
    #[test]
    fn prop_encrypt_state_gated(body in prop::collection::vec(any::<u8>(), 0..1024)) {
        init_test_keys();
        let mut packet = Packet::create(9, body.as_slice()).expect("create");
        let plain = packet.body().to_vec();

        packet.encrypt().expect("encrypt");
        let cipher = packet.body().to_vec();
        packet.encrypt().expect("encrypt");
        prop_assert_eq!(packet.body(), cipher.as_slice());

        packet.decrypt().expect("decrypt");
        prop_assert_eq!(packet.body(), plain.as_slice());
        packet.decrypt().expect("decrypt");
        prop_assert_eq!(packet.body(), plain.as_slice());
    }
}

// Property: encrypt-then-decrypt restores the body byte for byte while the
// body fits inside the key
proptest! {
    #[test]
    fn prop_encrypt_decrypt_restores(
        id in any::<u16>(),
        body in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        init_test_keys();
        let mut packet = Packet::create(id, body.as_slice()).expect("create");

        packet.encrypt().expect("encrypt");
        packet.decrypt().expect("decrypt");

        prop_assert_eq!(packet.body(), body.as_slice());
    }
}

// Property: an obfuscated packet survives the wire, including the header XOR
proptest! {
    #[test]
    fn prop_encrypted_wire_roundtrip(
        id in any::<u16>(),
        body in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        init_test_keys();
        let mut packet = Packet::create(id, body.as_slice()).expect("create");
        packet.encrypt().expect("encrypt");

        let wire = packet.to_bytes().expect("encode");
        let mut decoded = Packet::from_bytes(&wire).expect("decode");

        prop_assert!(decoded.is_encrypted());
        decoded.decrypt().expect("decrypt");
        prop_assert_eq!(decoded.body(), body.as_slice());
        prop_assert_eq!(decoded.id, id);
    }
}

// Property: the framer yields the same packet wherever the stream splits
proptest! {
    #[test]
    fn prop_codec_split_points(
        body in prop::collection::vec(any::<u8>(), 0..512),
        split_seed in any::<usize>(),
    ) {
        let packet = Packet::create(1234, body.as_slice()).expect("create");
        let frame = packet.to_bytes().expect("encode");
        let split = split_seed % (frame.len() + 1);

        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..split]);
        let early = codec.decode(&mut buf).expect("decode");
        if split < frame.len() {
            prop_assert!(early.is_none());
        }

        buf.extend_from_slice(&frame[split..]);
        let decoded = match early {
            Some(p) => p,
            None => codec.decode(&mut buf).expect("decode").expect("whole frame"),
        };
        prop_assert_eq!(decoded, packet);
    }
}

// Property: reading past the body always errors instead of panicking
proptest! {
    #[test]
    fn prop_read_underflow_errors(body in prop::collection::vec(any::<u8>(), 0..8)) {
        let packet = Packet::create(5, body.as_slice()).expect("create");
        prop_assert!(packet.read::<u64>().is_err());
    }
}
