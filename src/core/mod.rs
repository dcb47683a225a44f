//! # Core Protocol Components
//!
//! Low-level packet handling, obfuscation, and binary field codecs.
//!
//! This module provides the foundation for the protocol: packet framing,
//! header encoding/decoding, and the XOR passes lifted from the
//! reverse-engineered client.
//!
//! ## Components
//! - **Packet**: 6-byte-header frames with XOR-obfuscated header/body regions
//! - **Codec**: Tokio codec framing packets over byte streams
//! - **Crypt**: the two key slices and their self-inverse XOR passes
//! - **Wire**: fixed-width little-endian field traits for payloads
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Encrypted(1)] [Num(1)] [Id(2, LE)] [Body(N)]
//! ```
//!
//! Maximum frame size is 65535 bytes (the length field is a `u16`), leaving
//! 65529 bytes for the body.

pub mod codec;
pub mod crypt;
pub mod packet;
pub mod wire;
