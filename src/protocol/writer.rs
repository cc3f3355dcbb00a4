use super::ProtocolError;

/// Fixed-capacity little-endian packet builder.
///
/// Tracks its own write cursor and refuses writes past the capacity given at construction,
/// so a miscounted payload surfaces as `BufferOverflow` instead of a short or garbled packet.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl PacketWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Current cursor position, i.e. the number of bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<&mut Self, ProtocolError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<&mut Self, ProtocolError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<&mut Self, ProtocolError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        if bytes.len() > self.remaining() {
            return Err(ProtocolError::BufferOverflow {
                offset: self.position(),
                requested: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    /// Overwrites an already written u32 without moving the cursor.
    pub fn patch_u32_le(&mut self, offset: usize, value: u32) -> Result<(), ProtocolError> {
        let slot = self
            .buf
            .get_mut(offset..offset + 4)
            .ok_or(ProtocolError::BufferOverflow {
                offset,
                requested: 4,
                capacity: self.capacity,
            })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
