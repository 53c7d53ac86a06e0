//! Little-endian builder for wire structures.
//!
//! Used by the loopback executor and by tests to produce the same bytes a
//! real executor would.

/// Growable little-endian buffer with back-patching.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    /// Append `units` as UTF-16LE without a terminator; returns the byte length.
    pub fn put_utf16(&mut self, units: &[u16]) -> usize {
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        units.len() * 2
    }

    /// Zero-pad up to the next multiple of `align`.
    pub fn align_to(&mut self, align: usize) {
        let rem = self.buf.len() % align;
        if rem != 0 {
            self.put_zeros(align - rem);
        }
    }

    /// Overwrite a previously reserved field. Out-of-range patches are ignored.
    pub fn patch_u16(&mut self, offset: usize, v: u16) {
        if let Some(slot) = self.buf.get_mut(offset..offset + 2) {
            slot.copy_from_slice(&v.to_le_bytes());
        }
    }

    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        if let Some(slot) = self.buf.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&v.to_le_bytes());
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
