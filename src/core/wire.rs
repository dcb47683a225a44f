//! # Fixed-Width Wire Fields
//!
//! R2 payloads are flat tuples of fixed-width little-endian values; there is
//! no self-describing schema on the wire. This module provides the two traits
//! the packet layer reads and writes payloads through:
//!
//! - [`WireWrite`]: serialize a value as little-endian fixed-width bytes.
//! - [`WireRead`]: consume a value from the front of a byte slice.
//!
//! Implementations cover the integer widths the protocol uses (8/16/32/64,
//! signed and unsigned), fixed-size arrays of them, slices of them on the
//! write side, and tuples up to arity 8 for composite records. A field
//! without a fixed width simply has no implementation, so it cannot reach
//! the wire. Reads need a known width, so only arrays (not slices) can be
//! decoded.

use bytes::{Buf, BufMut};

use crate::error::{NetError, Result};

/// A value that can be appended to a packet body as little-endian bytes.
pub trait WireWrite {
    fn encode_to(&self, out: &mut Vec<u8>);
}

/// A value that can be consumed from the front of a packet body.
pub trait WireRead: Sized {
    fn decode_from(buf: &mut &[u8]) -> Result<Self>;
}

fn ensure(buf: &&[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(NetError::ShortBody {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

macro_rules! impl_wire_int {
    ($($ty:ty => $get:ident, $put:ident, $width:expr;)*) => {
        $(
            impl WireWrite for $ty {
                fn encode_to(&self, out: &mut Vec<u8>) {
                    out.$put(*self);
                }
            }

            impl WireRead for $ty {
                fn decode_from(buf: &mut &[u8]) -> Result<Self> {
                    ensure(buf, $width)?;
                    Ok(buf.$get())
                }
            }
        )*
    };
}

impl_wire_int! {
    u8  => get_u8,     put_u8,     1;
    i8  => get_i8,     put_i8,     1;
    u16 => get_u16_le, put_u16_le, 2;
    i16 => get_i16_le, put_i16_le, 2;
    u32 => get_u32_le, put_u32_le, 4;
    i32 => get_i32_le, put_i32_le, 4;
    u64 => get_u64_le, put_u64_le, 8;
    i64 => get_i64_le, put_i64_le, 8;
}

impl<T: WireWrite, const N: usize> WireWrite for [T; N] {
    fn encode_to(&self, out: &mut Vec<u8>) {
        for item in self {
            item.encode_to(out);
        }
    }
}

impl<'a, T: WireWrite> WireWrite for &'a [T] {
    fn encode_to(&self, out: &mut Vec<u8>) {
        for item in *self {
            item.encode_to(out);
        }
    }
}

impl<T: WireWrite> WireWrite for Vec<T> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.as_slice().encode_to(out);
    }
}

impl<T: WireRead, const N: usize> WireRead for [T; N] {
    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode_from(buf)?);
        }
        // length is exactly N, the conversion cannot fail
        items
            .try_into()
            .map_err(|_| NetError::ShortBody { needed: N, remaining: 0 })
    }
}

impl WireWrite for () {
    fn encode_to(&self, _out: &mut Vec<u8>) {}
}

impl WireRead for () {
    fn decode_from(_buf: &mut &[u8]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_wire_tuple {
    ($($name:ident),+) => {
        impl<$($name: WireWrite),+> WireWrite for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode_to(&self, out: &mut Vec<u8>) {
                let ($(ref $name,)+) = *self;
                $($name.encode_to(out);)+
            }
        }

        impl<$($name: WireRead),+> WireRead for ($($name,)+) {
            #[allow(non_snake_case)]
            fn decode_from(buf: &mut &[u8]) -> Result<Self> {
                $(let $name = $name::decode_from(buf)?;)+
                Ok(($($name,)+))
            }
        }
    };
}

impl_wire_tuple!(A);
impl_wire_tuple!(A, B);
impl_wire_tuple!(A, B, C);
impl_wire_tuple!(A, B, C, D);
impl_wire_tuple!(A, B, C, D, E);
impl_wire_tuple!(A, B, C, D, E, F);
impl_wire_tuple!(A, B, C, D, E, F, G);
impl_wire_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn encode<T: WireWrite>(value: T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode_to(&mut out);
        out
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(encode(0x1234u16), vec![0x34, 0x12]);
        assert_eq!(encode(0x6e9589d4u32), vec![0xd4, 0x89, 0x95, 0x6e]);
        assert_eq!(encode(-1i8), vec![0xff]);
        assert_eq!(
            encode(0x0102030405060708u64),
            vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn integer_roundtrip() {
        let bytes = encode((0xdeadu16, -7i32, 42u8));
        let mut cursor = bytes.as_slice();
        let (a, b, c) = <(u16, i32, u8)>::decode_from(&mut cursor).expect("decode");
        assert_eq!((a, b, c), (0xdead, -7, 42));
        assert!(cursor.is_empty());
    }

    #[test]
    fn slices_encode_elementwise() {
        let values: Vec<u16> = vec![0x0102, 0x0304];
        assert_eq!(encode(values.as_slice()), vec![0x02, 0x01, 0x04, 0x03]);
        assert_eq!(encode(values), vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn arrays_roundtrip() {
        let bytes = encode([1u16, 2, 3]);
        assert_eq!(bytes, vec![1, 0, 2, 0, 3, 0]);
        let mut cursor = bytes.as_slice();
        let arr = <[u16; 3]>::decode_from(&mut cursor).expect("decode");
        assert_eq!(arr, [1, 2, 3]);
    }

    #[test]
    fn underflow_is_short_body() {
        let bytes = vec![0x01, 0x02];
        let mut cursor = bytes.as_slice();
        let err = u32::decode_from(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            NetError::ShortBody { needed: 4, remaining: 2 }
        ));
    }

    #[test]
    fn tuple_decode_is_sequential() {
        // (u32, u16) over 6 bytes consumes front-to-back
        let bytes = vec![0xd4, 0x89, 0x95, 0x6e, 0xdc, 0x05];
        let mut cursor = bytes.as_slice();
        let (a, b) = <(u32, u16)>::decode_from(&mut cursor).expect("decode");
        assert_eq!(a, 1855293908);
        assert_eq!(b, 1500);
    }
}
