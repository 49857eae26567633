//! Serialization of the per-method envelope that travels through storage
//! and into `.aotcd` sections.
//!
//! Wire format, little-endian:
//!
//! ```text
//! [total size: usize][code size: u32][code bytes][reloc size: u32][reloc bytes]
//! ```
//!
//! The total size counts every byte of the envelope including itself.
//! Deserialization aliases the input buffer rather than copying: the
//! returned header borrows its code and relocation slices from the caller's
//! bytes, so a loaded image can hand out views without duplication.

use crate::error::AotError;

const WORD: usize = std::mem::size_of::<usize>();

/// Borrowed view of one compiled method: its machine code and the relocation
/// record group that fixes the code up after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AotMethodHeader<'a> {
    pub code: &'a [u8],
    pub relocations: &'a [u8],
}

impl<'a> AotMethodHeader<'a> {
    pub fn new(code: &'a [u8], relocations: &'a [u8]) -> Self {
        Self { code, relocations }
    }

    /// Number of bytes `serialize` will produce.
    pub fn serialized_len(&self) -> usize {
        WORD + 4 + self.code.len() + 4 + self.relocations.len()
    }

    /// Write the envelope into `buf`. The buffer must hold at least
    /// `serialized_len()` bytes; anything smaller is a capacity error, not a
    /// partial write.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, AotError> {
        let total = self.serialized_len();
        if buf.len() < total {
            return Err(AotError::Capacity(total, buf.len()));
        }
        let mut pos = 0;
        buf[pos..pos + WORD].copy_from_slice(&total.to_le_bytes());
        pos += WORD;
        buf[pos..pos + 4].copy_from_slice(&(self.code.len() as u32).to_le_bytes());
        pos += 4;
        buf[pos..pos + self.code.len()].copy_from_slice(self.code);
        pos += self.code.len();
        buf[pos..pos + 4].copy_from_slice(&(self.relocations.len() as u32).to_le_bytes());
        pos += 4;
        buf[pos..pos + self.relocations.len()].copy_from_slice(self.relocations);
        pos += self.relocations.len();
        Ok(pos)
    }

    /// Serialize into a fresh buffer.
    pub fn serialize_to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.serialized_len()];
        // Capacity is exact by construction.
        let written = self.serialize(&mut buf).unwrap_or(0);
        debug_assert_eq!(written, buf.len());
        buf
    }

    /// Parse an envelope, borrowing code and relocation slices from `buf`.
    /// The declared sizes must be mutually consistent and fit in the buffer.
    pub fn deserialize(buf: &'a [u8]) -> Result<Self, AotError> {
        if buf.len() < WORD + 4 {
            return Err(AotError::MalformedImage(format!(
                "method envelope truncated: {} bytes", buf.len()
            )));
        }
        let mut word = [0u8; WORD];
        word.copy_from_slice(&buf[..WORD]);
        let total = usize::from_le_bytes(word);
        if total < WORD + 8 || total > buf.len() {
            return Err(AotError::MalformedImage(format!(
                "method envelope declares {} bytes, buffer holds {}", total, buf.len()
            )));
        }
        let mut pos = WORD;
        let code_size = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;
        if pos + code_size + 4 > total {
            return Err(AotError::MalformedImage(format!(
                "code size {} overruns envelope of {} bytes", code_size, total
            )));
        }
        let code = &buf[pos..pos + code_size];
        pos += code_size;
        let reloc_size = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;
        if pos + reloc_size != total {
            return Err(AotError::MalformedImage(format!(
                "envelope sizes inconsistent: {} + {} != {}", pos, reloc_size, total
            )));
        }
        let relocations = &buf[pos..pos + reloc_size];
        Ok(Self { code, relocations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let code = [0x55u8, 0x48, 0x89, 0xe5, 0x5d, 0xc3];
        let relocs = [1u8, 2, 3, 4];
        let hdr = AotMethodHeader::new(&code, &relocs);
        let bytes = hdr.serialize_to_vec();
        assert_eq!(bytes.len(), hdr.serialized_len());
        let back = AotMethodHeader::deserialize(&bytes).unwrap();
        assert_eq!(back, hdr);
    }

    #[test]
    fn test_round_trip_empty() {
        let hdr = AotMethodHeader::new(&[], &[]);
        let bytes = hdr.serialize_to_vec();
        assert_eq!(bytes.len(), WORD + 8);
        let back = AotMethodHeader::deserialize(&bytes).unwrap();
        assert!(back.code.is_empty());
        assert!(back.relocations.is_empty());
    }

    #[test]
    fn test_deserialize_borrows() {
        let code = [0xc3u8];
        let hdr = AotMethodHeader::new(&code, &[]);
        let bytes = hdr.serialize_to_vec();
        let back = AotMethodHeader::deserialize(&bytes).unwrap();
        // The view aliases the serialized buffer, no copy.
        assert_eq!(back.code.as_ptr(), bytes[WORD + 4..].as_ptr());
    }

    #[test]
    fn test_serialize_capacity_error() {
        let code = [0u8; 16];
        let hdr = AotMethodHeader::new(&code, &[]);
        let mut small = [0u8; 8];
        match hdr.serialize(&mut small) {
            Err(AotError::Capacity(needed, avail)) => {
                assert_eq!(needed, hdr.serialized_len());
                assert_eq!(avail, 8);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_rejects_bad_sizes() {
        let hdr = AotMethodHeader::new(&[1, 2, 3], &[4]);
        let mut bytes = hdr.serialize_to_vec();
        // Inflate the declared code size past the envelope.
        bytes[WORD] = 0xff;
        assert!(AotMethodHeader::deserialize(&bytes).is_err());
        assert!(AotMethodHeader::deserialize(&[0u8; 4]).is_err());
    }
}
