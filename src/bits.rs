//! Bit cursors over byte buffers, most significant bit first.

/// A read position inside a byte slice: `byte` index plus `bit` offset (0 = MSB).
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        return BitReader {
            bytes: bytes,
            byte: 0,
            bit: 0,
        };
    }

    pub fn remaining(&self) -> usize {
        if self.byte >= self.bytes.len() {
            return 0;
        }

        return (self.bytes.len() - self.byte) * 8 - self.bit as usize;
    }

    pub fn read_bit(&mut self) -> Option<bool> {
        let byte: u8 = *self.bytes.get(self.byte)?;
        let value: bool = (byte >> (7 - self.bit)) & 1 == 1;

        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }

        return Some(value);
    }
}

impl<'a> Iterator for BitReader<'a> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        return self.read_bit();
    }
}

/// A write position inside a caller-owned byte buffer.
///
/// Bits land in the buffer as they are written, a partially filled last byte is kept
/// zero-padded on the right.
#[derive(Debug)]
pub struct BitWriter<'a> {
    bytes: &'a mut [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitWriter<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        return BitWriter {
            bytes: bytes,
            byte: 0,
            bit: 0,
        };
    }

    /// Appends one bit. Returns `false` without writing when the buffer is full.
    pub fn write_bit(&mut self, value: bool) -> bool {
        let Some(slot) = self.bytes.get_mut(self.byte) else {
            return false;
        };

        if self.bit == 0 {
            *slot = 0;
        }
        if value {
            *slot |= 0x80 >> self.bit;
        }

        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }

        return true;
    }

    /// Appends a whole byte. Only valid on a byte boundary.
    pub fn write_byte(&mut self, value: u8) -> bool {
        debug_assert_eq!(self.bit, 0, "write_byte off a byte boundary");

        let Some(slot) = self.bytes.get_mut(self.byte) else {
            return false;
        };
        *slot = value;
        self.byte += 1;

        return true;
    }

    /// Moves to the start of the next byte, leaving the padding bits at zero.
    pub fn align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.byte += 1;
        }
    }

    /// Number of bytes touched so far, counting a partial last byte.
    pub fn bytes_written(&self) -> usize {
        return self.byte + (self.bit != 0) as usize;
    }
}
