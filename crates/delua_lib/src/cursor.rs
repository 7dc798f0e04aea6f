use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::DeluaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    Big,
    Little,
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: Endianness,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            order: Endianness::Little,
        }
    }

    pub(crate) fn set_order(&mut self, order: Endianness) {
        self.order = order;
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, DeluaError> {
        Ok(self.get_bytes(1)?[0])
    }

    pub(crate) fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DeluaError> {
        if self.remaining() < n {
            return Err(DeluaError::Truncated {
                offset: self.pos(),
                needed: n,
                remaining: self.remaining(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Unsigned integer of `width` bytes (1..=8).
    pub(crate) fn get_uint(&mut self, width: u8) -> Result<u64, DeluaError> {
        let order = self.order;
        let bytes = self.get_bytes(width as usize)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_uint(bytes, bytes.len()),
            Endianness::Big => BigEndian::read_uint(bytes, bytes.len()),
        })
    }

    /// Signed integer of `width` bytes (1..=8), sign-extended.
    pub(crate) fn get_int(&mut self, width: u8) -> Result<i64, DeluaError> {
        let order = self.order;
        let bytes = self.get_bytes(width as usize)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_int(bytes, bytes.len()),
            Endianness::Big => BigEndian::read_int(bytes, bytes.len()),
        })
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, DeluaError> {
        let order = self.order;
        let bytes = self.get_bytes(4)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_u32(bytes),
            Endianness::Big => BigEndian::read_u32(bytes),
        })
    }

    pub(crate) fn get_f32(&mut self) -> Result<f32, DeluaError> {
        let order = self.order;
        let bytes = self.get_bytes(4)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_f32(bytes),
            Endianness::Big => BigEndian::read_f32(bytes),
        })
    }

    pub(crate) fn get_f64(&mut self) -> Result<f64, DeluaError> {
        let order = self.order;
        let bytes = self.get_bytes(8)?;
        Ok(match order {
            Endianness::Little => LittleEndian::read_f64(bytes),
            Endianness::Big => BigEndian::read_f64(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_and_big_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04];

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_uint(4).unwrap(), 0x0403_0201);

        let mut r = Reader::new(&bytes);
        r.set_order(Endianness::Big);
        assert_eq!(r.get_uint(4).unwrap(), 0x0102_0304);

        let mut r = Reader::new(&bytes);
        r.set_order(Endianness::Big);
        assert_eq!(r.get_u32().unwrap(), 0x0102_0304);
        assert_eq!(r.pos(), 4);
    }

    #[test]
    fn width_comes_from_caller() {
        let bytes = [0x34, 0x12, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_uint(2).unwrap(), 0x1234);
        assert_eq!(r.get_uint(8).unwrap(), 0x0100_0000_0000_00ff);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn signed_reads_sign_extend() {
        let mut r = Reader::new(&[0xff, 0xff, 0xff, 0xff, 0xfe, 0xff]);
        assert_eq!(r.get_int(4).unwrap(), -1);
        assert_eq!(r.get_int(2).unwrap(), -2);
    }

    #[test]
    fn floats_honour_byte_order() {
        let le = 1.5f64.to_le_bytes();
        let mut r = Reader::new(&le);
        assert_eq!(r.get_f64().unwrap(), 1.5);

        let be = (-0.25f32).to_be_bytes();
        let mut r = Reader::new(&be);
        r.set_order(Endianness::Big);
        assert_eq!(r.get_f32().unwrap(), -0.25);
    }

    #[test]
    fn short_read_reports_position_and_does_not_advance() {
        let mut r = Reader::new(&[0xaa, 0xbb, 0xcc]);
        r.get_u8().unwrap();
        let err = r.get_uint(4).unwrap_err();
        match err {
            DeluaError::Truncated {
                offset,
                needed,
                remaining,
            } => {
                assert_eq!(offset, 1);
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.pos(), 1);
    }
}
