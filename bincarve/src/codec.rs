//! Endian-aware decoding and encoding of fixed-width values.
//!
//! Endianness is decided in exactly one place: a [`Codec`] derives a `swap`
//! flag from the declared byte order versus the host's, and every
//! width-specific accessor is a thin instantiation of the same rule (copy
//! the field's bytes, reverse them when `swap`, interpret natively).

use crate::errors::{CarveError, CarveResult};

/// Declared byte order of the data being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the host.
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// Whether values in this order must be byte-reversed on this host.
    pub const fn swap_on_host(self) -> bool {
        !matches!(
            (self, Self::host()),
            (Endianness::Little, Endianness::Little) | (Endianness::Big, Endianness::Big)
        )
    }
}

/// Decodes and encodes fixed-width values in a declared byte order.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    endianness: Endianness,
    swap: bool,
}

macro_rules! codec_width {
    ($decode:ident, $encode:ident, $ty:ty) => {
        /// Decodes a value from the start of `bytes`.
        pub fn $decode(&self, bytes: &[u8]) -> CarveResult<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let field: &[u8; N] = bytes
                .get(..N)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| CarveError::insufficient_data(N, bytes.len(), 0))?;
            let mut raw = *field;
            if self.swap {
                raw.reverse();
            }
            Ok(<$ty>::from_ne_bytes(raw))
        }

        /// Encodes `value` into the start of `out`.
        pub fn $encode(&self, value: $ty, out: &mut [u8]) -> CarveResult<()> {
            const N: usize = std::mem::size_of::<$ty>();
            let available = out.len();
            let field = out
                .get_mut(..N)
                .ok_or_else(|| CarveError::insufficient_data(N, available, 0))?;
            let mut raw = value.to_ne_bytes();
            if self.swap {
                raw.reverse();
            }
            field.copy_from_slice(&raw);
            Ok(())
        }
    };
}

macro_rules! codec_bulk {
    ($name:ident, $ty:ty) => {
        /// Applies the swap per-element in place over a bulk array.
        pub fn $name(&self, values: &mut [$ty]) {
            if self.swap {
                for v in values.iter_mut() {
                    *v = v.swap_bytes();
                }
            }
        }
    };
}

impl Codec {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            endianness,
            swap: endianness.swap_on_host(),
        }
    }

    pub fn little_endian(&self) -> bool {
        self.endianness == Endianness::Little
    }

    /// Whether multi-byte fields are byte-reversed relative to the host.
    pub fn swap(&self) -> bool {
        self.swap
    }

    pub fn decode_u8(&self, bytes: &[u8]) -> CarveResult<u8> {
        bytes
            .first()
            .copied()
            .ok_or_else(|| CarveError::insufficient_data(1, 0, 0))
    }

    pub fn decode_i8(&self, bytes: &[u8]) -> CarveResult<i8> {
        self.decode_u8(bytes).map(|v| v as i8)
    }

    codec_width!(decode_u16, encode_u16, u16);
    codec_width!(decode_u32, encode_u32, u32);
    codec_width!(decode_u64, encode_u64, u64);
    codec_width!(decode_i16, encode_i16, i16);
    codec_width!(decode_i32, encode_i32, i32);
    codec_width!(decode_i64, encode_i64, i64);

    /// Decodes an IEEE-754 single through its bit pattern.
    pub fn decode_f32(&self, bytes: &[u8]) -> CarveResult<f32> {
        self.decode_u32(bytes).map(f32::from_bits)
    }

    pub fn decode_f64(&self, bytes: &[u8]) -> CarveResult<f64> {
        self.decode_u64(bytes).map(f64::from_bits)
    }

    pub fn encode_f32(&self, value: f32, out: &mut [u8]) -> CarveResult<()> {
        self.encode_u32(value.to_bits(), out)
    }

    pub fn encode_f64(&self, value: f64, out: &mut [u8]) -> CarveResult<()> {
        self.encode_u64(value.to_bits(), out)
    }

    codec_bulk!(swap_slice_u16, u16);
    codec_bulk!(swap_slice_u32, u32);
    codec_bulk!(swap_slice_u64, u64);
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Endianness::Little)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_derivation() {
        assert!(!Endianness::host().swap_on_host());
        let other = match Endianness::host() {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        };
        assert!(other.swap_on_host());
    }

    #[test]
    fn test_round_trip_all_widths() {
        for endianness in [Endianness::Little, Endianness::Big] {
            let codec = Codec::new(endianness);
            let mut buf = [0u8; 8];

            codec.encode_u16(0xBEEF, &mut buf).unwrap();
            assert_eq!(codec.decode_u16(&buf).unwrap(), 0xBEEF);

            codec.encode_u32(0xDEAD_BEEF, &mut buf).unwrap();
            assert_eq!(codec.decode_u32(&buf).unwrap(), 0xDEAD_BEEF);

            codec.encode_u64(0x0123_4567_89AB_CDEF, &mut buf).unwrap();
            assert_eq!(codec.decode_u64(&buf).unwrap(), 0x0123_4567_89AB_CDEF);

            codec.encode_i16(-2, &mut buf).unwrap();
            assert_eq!(codec.decode_i16(&buf).unwrap(), -2);

            codec.encode_i32(-70_000, &mut buf).unwrap();
            assert_eq!(codec.decode_i32(&buf).unwrap(), -70_000);

            codec.encode_i64(i64::MIN + 1, &mut buf).unwrap();
            assert_eq!(codec.decode_i64(&buf).unwrap(), i64::MIN + 1);

            codec.encode_f32(1.5, &mut buf).unwrap();
            assert_eq!(codec.decode_f32(&buf).unwrap(), 1.5);

            codec.encode_f64(-2.25, &mut buf).unwrap();
            assert_eq!(codec.decode_f64(&buf).unwrap(), -2.25);
        }
    }

    #[test]
    fn test_known_byte_layout() {
        let le = Codec::new(Endianness::Little);
        let be = Codec::new(Endianness::Big);

        assert_eq!(le.decode_u32(&[0x01, 0x00, 0x00, 0x00]).unwrap(), 1);
        assert_eq!(be.decode_u32(&[0x00, 0x00, 0x00, 0x01]).unwrap(), 1);
        assert_eq!(le.decode_u16(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(be.decode_u16(&[0x12, 0x34]).unwrap(), 0x1234);
    }

    #[test]
    fn test_short_input_is_insufficient_data() {
        let codec = Codec::default();
        let err = codec.decode_u32(&[0x01, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            CarveError::InsufficientData {
                requested: 4,
                read: 2,
                ..
            }
        ));

        // The encode side reports the space actually available, like the
        // decode side does.
        let mut short = [0u8; 3];
        let err = codec.encode_u32(7, &mut short).unwrap_err();
        assert!(matches!(
            err,
            CarveError::InsufficientData {
                requested: 4,
                read: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_bulk_swap() {
        let le = Codec::new(Endianness::Little);
        let be = Codec::new(Endianness::Big);
        let mut values = [0x1122u16, 0x3344];

        le.swap_slice_u16(&mut values);
        be.swap_slice_u16(&mut values);
        // Exactly one of the two codecs swaps on any host.
        assert_eq!(values, [0x2211, 0x4433]);
    }
}
