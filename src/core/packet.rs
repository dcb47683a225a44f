//! # Packet
//!
//! In-memory representation of one R2 frame and its wire codec.
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Encrypted(1)] [Num(1)] [Id(2, LE)] [Body(Length - 6)]
//! ```
//!
//! `Length` counts the full frame including the 6-byte header; the maximum
//! frame is 65535 bytes, so a body holds at most 65529.
//!
//! ## Header obfuscation quirk
//! The client XORs the 6 header bytes with the header key whenever the body
//! is obfuscated. The two directions key off different things and must stay
//! that way for wire compatibility:
//! - **reading**: the raw byte at offset 2 being nonzero triggers the header
//!   XOR *before* field decoding;
//! - **writing**: the packet's `encrypted` flag triggers it *after* field
//!   encoding.

use std::fmt;

use crate::core::crypt;
use crate::core::wire::{WireRead, WireWrite};
use crate::error::{NetError, Result};

/// Size of the packet header in bytes.
pub const HEADER_LEN: usize = 6;

/// Maximum body size; `u16::MAX` minus the header.
pub const MAX_BODY_LEN: usize = 65529;

/// One protocol frame.
///
/// `id` and `num` are plain fields the application may rewrite; the body,
/// length and encryption flag only change together through the codec
/// operations so they stay consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Application-meaningful message type.
    pub id: u16,
    /// Sequence/subtype byte, opaque to the codec.
    pub num: u8,
    encrypted: bool,
    body: Vec<u8>,
    length: u16,
}

impl Packet {
    /// Build a packet with `id` and a body serialized from `fields` as
    /// little-endian fixed-width values.
    ///
    /// Pass `()` for an empty body, a single value, or a tuple for a
    /// composite payload:
    ///
    /// ```
    /// use r2o_net::core::packet::Packet;
    ///
    /// let p = Packet::create(1102, (10001u16, 2208232205u32, 0u32)).unwrap();
    /// assert_eq!(p.len(), 16);
    /// ```
    pub fn create(id: u16, fields: impl WireWrite) -> Result<Self> {
        let mut body = Vec::new();
        fields.encode_to(&mut body);

        if body.len() > MAX_BODY_LEN {
            return Err(NetError::PayloadTooLarge(body.len()));
        }

        Ok(Self {
            id,
            num: 0,
            encrypted: false,
            length: (HEADER_LEN + body.len()) as u16,
            body,
        })
    }

    /// Parse a packet from raw wire bytes.
    ///
    /// The buffer must hold at least the declared frame length. Trailing
    /// bytes past the declared length are permitted for streaming reassembly
    /// and become part of the body, exactly like the original server.
    pub fn from_bytes(wire: &[u8]) -> Result<Self> {
        if wire.len() < HEADER_LEN {
            return Err(NetError::ShortHeader(wire.len()));
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&wire[..HEADER_LEN]);

        // Read-side quirk: a nonzero raw byte at offset 2 means the header
        // travelled XORed, whatever the flag decodes to afterwards.
        if header[2] != 0 {
            crypt::keys()?.crypt_headers(&mut header);
        }

        let length = u16::from_le_bytes([header[0], header[1]]);
        if (length as usize) < HEADER_LEN || wire.len() < length as usize {
            return Err(NetError::LengthMismatch {
                declared: length,
                actual: wire.len(),
            });
        }

        Ok(Self {
            id: u16::from_le_bytes([header[4], header[5]]),
            num: header[3],
            encrypted: header[2] != 0,
            body: wire[HEADER_LEN..].to_vec(),
            length,
        })
    }

    /// Parse a packet from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    /// Obfuscate the body if it is currently plaintext.
    pub fn encrypt(&mut self) -> Result<()> {
        if !self.encrypted {
            crypt::keys()?.crypt_body(&mut self.body);
            self.encrypted = true;
        }
        Ok(())
    }

    /// Deobfuscate the body if it is currently obfuscated.
    pub fn decrypt(&mut self) -> Result<()> {
        if self.encrypted {
            crypt::keys()?.crypt_body(&mut self.body);
            self.encrypted = false;
        }
        Ok(())
    }

    /// Whether the body currently holds obfuscated bytes.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Declared frame length, header included.
    pub fn len(&self) -> u16 {
        self.length
    }

    /// True when the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The body bytes as currently held (plaintext or obfuscated, per
    /// [`Packet::is_encrypted`]).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Read fixed-width little-endian values from the front of the body.
    ///
    /// Each call starts from offset zero; ask for a tuple to consume several
    /// fields sequentially:
    ///
    /// ```
    /// use r2o_net::core::packet::Packet;
    ///
    /// let p = Packet::create(3102, 1855293908u32).unwrap();
    /// let error_id: u32 = p.read().unwrap();
    /// assert_eq!(error_id, 1855293908);
    /// ```
    pub fn read<T: WireRead>(&self) -> Result<T> {
        let mut cursor = self.body.as_slice();
        T::decode_from(&mut cursor)
    }

    /// Encode the packet into a fresh byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.push(self.encrypted as u8);
        out.push(self.num);
        out.extend_from_slice(&self.id.to_le_bytes());

        // Write-side quirk: keyed on the flag, applied after encoding.
        if self.encrypted {
            crypt::keys()?.crypt_headers(&mut out[..HEADER_LEN]);
        }

        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// The encoded frame as a hex string.
    pub fn hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }
}

/// Diagnostic rendering: header fields plus a 16-bytes-per-row hex + ASCII
/// dump of the full frame.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ID:       {}", self.id)?;
        writeln!(f, "Length:   {}", self.length)?;
        writeln!(f, "Encrypt:  {}", self.encrypted)?;
        writeln!(f, "Num:      {}", self.num)?;
        writeln!(f)?;
        writeln!(
            f,
            "Offset    01 02 03 04 05 06 07 08 09 10 11 12 13 14 15 16    ASCII"
        )?;
        writeln!(f)?;

        let bytes = match self.to_bytes() {
            Ok(bytes) => bytes,
            Err(_) => return write!(f, "<obfuscation keys not initialized>"),
        };

        let rows = bytes.chunks(16).count();
        for (row, chunk) in bytes.chunks(16).enumerate() {
            write!(f, "{:06}    ", row + 1)?;
            for col in 0..16 {
                match chunk.get(col) {
                    Some(b) => write!(f, "{b:02x}")?,
                    None => write!(f, "  ")?,
                }
                if col != 15 {
                    write!(f, " ")?;
                }
            }
            write!(f, "    ")?;
            for &b in chunk {
                if (33..=126).contains(&b) {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, ".")?;
                }
            }
            if row + 1 != rows {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
