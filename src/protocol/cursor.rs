//! Bounds-checked byte reader for untrusted wire input
//!
//! Every read returns `None` instead of indexing past the end of the buffer.

/// Forward-only reader over a byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        self.read_array::<2>().map(u16::from_be_bytes)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_array::<2>().map(u16::from_le_bytes)
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        self.read_array::<8>().map(u64::from_be_bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    /// Consume and return everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_order() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u8(), Some(0x01));
        assert_eq!(r.read_u16_be(), Some(0x0203));
        assert_eq!(r.read_u16_le(), Some(0x0504));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.read_u8(), None);
    }

    #[test]
    fn test_short_read_does_not_advance() {
        let data = [0xaa, 0xbb, 0xcc];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u64_be(), None);
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_bytes(usize::MAX), None);
        assert_eq!(r.rest(), &data[..]);
    }
}
