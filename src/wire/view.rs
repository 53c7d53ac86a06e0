//! Bounds-checked reads over a self-relative buffer.

use super::ProtocolError;

/// Read-only window over bytes received from the executor.
#[derive(Debug, Clone, Copy)]
pub struct WireView<'a> {
    bytes: &'a [u8],
}

impl<'a> WireView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow `length` bytes at `offset`, failing instead of reading past the end.
    pub fn bytes_at(&self, offset: usize, length: usize) -> Result<&'a [u8], ProtocolError> {
        let end = offset.checked_add(length).ok_or(ProtocolError::OutOfBounds {
            offset,
            length,
            bound: self.bytes.len(),
        })?;
        self.bytes.get(offset..end).ok_or(ProtocolError::OutOfBounds {
            offset,
            length,
            bound: self.bytes.len(),
        })
    }

    /// Narrow the view to `length` bytes at `offset`.
    pub fn sub_view(&self, offset: usize, length: usize) -> Result<WireView<'a>, ProtocolError> {
        self.bytes_at(offset, length).map(WireView::new)
    }

    pub fn read_u8_at(&self, offset: usize) -> Result<u8, ProtocolError> {
        Ok(self.bytes_at(offset, 1)?[0])
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16, ProtocolError> {
        let b = self.bytes_at(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32, ProtocolError> {
        let b = self.bytes_at(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64, ProtocolError> {
        let b = self.bytes_at(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Copy a UTF-16LE string of `length` bytes at `offset` into an owned `String`.
    ///
    /// Strings are not terminated on the wire. Unpaired surrogates are
    /// replaced rather than rejected; an odd byte length is rejected.
    pub fn read_str_at(&self, offset: usize, length: usize) -> Result<String, ProtocolError> {
        if length % 2 != 0 {
            return Err(ProtocolError::OddStringLength(length));
        }
        let raw = self.bytes_at(offset, length)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Sequential reader starting at `offset`.
    pub fn cursor_at(&self, offset: usize) -> WireCursor<'a> {
        WireCursor { view: *self, position: offset }
    }
}

/// Sequential reader over a [`WireView`].
#[derive(Debug, Clone, Copy)]
pub struct WireCursor<'a> {
    view: WireView<'a>,
    position: usize,
}

impl<'a> WireCursor<'a> {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.view.len().saturating_sub(self.position)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ProtocolError> {
        self.view.bytes_at(self.position, count)?;
        self.position += count;
        Ok(())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let v = self.view.read_u16_at(self.position)?;
        self.position += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let v = self.view.read_u32_at(self.position)?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        let v = self.view.read_u64_at(self.position)?;
        self.position += 8;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_reads_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let view = WireView::new(&bytes);
        assert_eq!(view.read_u16_at(0).unwrap(), 0x0201);
        assert_eq!(view.read_u32_at(4).unwrap(), 0x0807_0605);
        assert_eq!(view.read_u64_at(0).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn test_read_past_end_fails() {
        let bytes = [0u8; 6];
        let view = WireView::new(&bytes);
        assert!(matches!(
            view.read_u32_at(4),
            Err(ProtocolError::OutOfBounds { offset: 4, length: 4, bound: 6 })
        ));
        assert!(view.read_u8_at(6).is_err());
    }

    #[test]
    fn test_offset_overflow_fails_closed() {
        let bytes = [0u8; 4];
        let view = WireView::new(&bytes);
        assert!(view.bytes_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_read_str() {
        let mut bytes = vec![0xAA, 0xBB];
        bytes.extend(utf16("Test01"));
        let view = WireView::new(&bytes);
        assert_eq!(view.read_str_at(2, 12).unwrap(), "Test01");
        assert_eq!(view.read_str_at(2, 0).unwrap(), "");
    }

    #[test]
    fn test_read_str_odd_length() {
        let bytes = utf16("abc");
        let view = WireView::new(&bytes);
        assert_eq!(view.read_str_at(0, 3), Err(ProtocolError::OddStringLength(3)));
    }

    #[test]
    fn test_cursor_advances() {
        let bytes = [1, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = WireView::new(&bytes).cursor_at(0);
        assert_eq!(cursor.read_u16().unwrap(), 1);
        assert_eq!(cursor.read_u32().unwrap(), 2);
        assert_eq!(cursor.read_u64().unwrap(), 3);
        assert_eq!(cursor.remaining(), 0);
        assert!(cursor.read_u16().is_err());
    }
}
