// src/bitstream.rs
//! Big-endian bit reader/writer used by the SCTE-35 codec.
//!
//! Neither side aligns implicitly. Callers read and write the reserved and
//! padding fields the section syntax defines.

use crate::error::BitstreamError;

/// Bit cursor over a borrowed byte buffer.
pub struct BitReader<'a> {
    data: &'a [u8],
    bitpos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { data, bitpos: 0 } }

    pub fn read_u8(&mut self, nbits: u32) -> Result<u8, BitstreamError>  { Ok(self.read_bits(nbits)? as u8) }
    pub fn read_u16(&mut self, nbits: u32) -> Result<u16, BitstreamError> { Ok(self.read_bits(nbits)? as u16) }
    pub fn read_u32(&mut self, nbits: u32) -> Result<u32, BitstreamError> { Ok(self.read_bits(nbits)? as u32) }
    pub fn read_flag(&mut self) -> Result<bool, BitstreamError> { Ok(self.read_bits(1)? == 1) }

    /// Reads `nbits` (0..=64) MSB first. The cursor does not move on failure.
    pub fn read_bits(&mut self, nbits: u32) -> Result<u64, BitstreamError> {
        self.ensure(nbits as usize)?;
        let mut v = 0u64;
        for _ in 0..nbits {
            let byte = self.data[self.bitpos / 8];
            let bit = 7 - (self.bitpos % 8);
            v = (v << 1) | ((byte >> bit) & 1) as u64;
            self.bitpos += 1;
        }
        Ok(v)
    }

    pub fn skip_bits(&mut self, nbits: usize) -> Result<(), BitstreamError> {
        self.ensure(nbits)?;
        self.bitpos += nbits;
        Ok(())
    }

    /// Reads `len` whole bytes. The cursor need not be byte aligned.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, BitstreamError> {
        self.ensure(len * 8)?;
        if self.bitpos % 8 == 0 {
            let start = self.bitpos / 8;
            self.bitpos += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }
        (0..len).map(|_| self.read_u8(8)).collect()
    }

    pub fn position(&self) -> usize { self.bitpos }

    pub fn remaining(&self) -> usize { self.data.len() * 8 - self.bitpos }

    fn ensure(&self, nbits: usize) -> Result<(), BitstreamError> {
        let remaining = self.remaining();
        if nbits > remaining {
            return Err(BitstreamError::TruncatedInput { needed: nbits, remaining });
        }
        Ok(())
    }
}

/// Append-only bit writer.
pub struct BitWriter {
    bytes: Vec<u8>,
    bitpos: usize,
}

impl BitWriter {
    pub fn new() -> Self { Self { bytes: Vec::with_capacity(256), bitpos: 0 } }

    /// Appends the low `nbits` of `value`; `value` must fit in `nbits`.
    pub fn write_bits(&mut self, value: u64, nbits: u32) -> Result<(), BitstreamError> {
        if nbits > 64 || (nbits < 64 && value >> nbits != 0) {
            return Err(BitstreamError::ValueOverflow { value, bits: nbits });
        }
        for i in (0..nbits).rev() {
            self.put_bit(((value >> i) & 1) as u8);
        }
        Ok(())
    }

    pub fn write_flag(&mut self, v: bool) { self.put_bit(v as u8); }

    /// Reserved fields are all ones.
    pub fn reserved(&mut self, nbits: u32) {
        for _ in 0..nbits { self.put_bit(1); }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.bitpos % 8 == 0 {
            self.bytes.extend_from_slice(data);
            self.bitpos += data.len() * 8;
            return;
        }
        for &b in data {
            for i in (0..8).rev() { self.put_bit((b >> i) & 1); }
        }
    }

    pub fn bitpos(&self) -> usize { self.bitpos }

    /// Returns the buffer; a trailing partial byte is zero padded.
    pub fn finish(self) -> Vec<u8> { self.bytes }

    fn put_bit(&mut self, bit: u8) {
        let byte_idx = self.bitpos / 8;
        if byte_idx == self.bytes.len() { self.bytes.push(0); }
        let shift = 7 - (self.bitpos % 8);
        self.bytes[byte_idx] |= (bit & 1) << shift;
        self.bitpos += 1;
    }
}

impl Default for BitWriter {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_byte_boundaries() {
        let buf = [0b1010_1010, 0b1111_0000];
        let mut br = BitReader::new(&buf);
        assert_eq!(br.read_bits(6).unwrap(), 0b101010);
        assert_eq!(br.read_bits(6).unwrap(), 0b101111);
        assert_eq!(br.remaining(), 4);
    }

    #[test]
    fn truncated_read_reports_shortfall_and_keeps_cursor() {
        let buf = [0xFF];
        let mut br = BitReader::new(&buf);
        br.skip_bits(3).unwrap();
        let err = br.read_bits(8).unwrap_err();
        assert_eq!(err, BitstreamError::TruncatedInput { needed: 8, remaining: 5 });
        assert_eq!(br.position(), 3);
        assert_eq!(br.read_bits(5).unwrap(), 0b11111);
    }

    #[test]
    fn reads_unaligned_bytes() {
        let buf = [0x0A, 0xBC, 0xD0];
        let mut br = BitReader::new(&buf);
        br.skip_bits(4).unwrap();
        assert_eq!(br.read_bytes(2).unwrap(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn writer_packs_msb_first() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3).unwrap();
        w.write_bits(0b11001, 5).unwrap();
        w.write_bits(0b0110, 4).unwrap();
        w.reserved(4);
        assert_eq!(w.finish(), vec![0b1011_1001, 0b0110_1111]);
    }

    #[test]
    fn writer_rejects_values_wider_than_field() {
        let mut w = BitWriter::new();
        assert_eq!(
            w.write_bits(0x100, 8),
            Err(BitstreamError::ValueOverflow { value: 0x100, bits: 8 })
        );
        assert!(w.write_bits(1 << 33, 33).is_err());
        assert!(w.write_bits((1 << 33) - 1, 33).is_ok());
        assert!(w.write_bits(u64::MAX, 64).is_ok());
    }

    #[test]
    fn writer_output_reads_back() {
        let mut w = BitWriter::new();
        w.write_flag(true);
        w.write_bits(0x1_2345_6789, 33).unwrap();
        w.write_bytes(b"CUEI");
        w.reserved(6);
        let bytes = w.finish();
        let mut br = BitReader::new(&bytes);
        assert!(br.read_flag().unwrap());
        assert_eq!(br.read_bits(33).unwrap(), 0x1_2345_6789);
        assert_eq!(br.read_bytes(4).unwrap(), b"CUEI".to_vec());
        assert_eq!(br.read_u8(6).unwrap(), 0x3F);
    }
}
