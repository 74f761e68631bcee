//! SHA-256 checksum type and the varuint64 codec used by the static-delta
//! operation stream.

use std::fmt;

use sha2::Digest as _;
use sha2::Sha256;

use crate::error::Error;
use crate::error::Result;

/// A SHA-256 digest. The sole identity of every stored object (invariant
/// I1): two objects with the same checksum are the same object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a lowercase hex checksum. Used for ref file contents, commit
    /// parent fields, and CLI `--from`/`--to` arguments.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 {
            return Err(Error::invalid_format(format!(
                "checksum must be 64 hex chars, got {} ('{s}')",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::invalid_format(format!("invalid hex checksum '{s}': {e}")))?;
        Ok(Self(bytes))
    }

    /// Whether `s` is a syntactically valid checksum, without allocating.
    /// Used by the pull engine's Phase 1 to distinguish a ref name from a
    /// bare commit checksum.
    pub fn looks_like_hex(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Checksum").field(&self.hex()).finish()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Streaming SHA-256, used while writing a loose object so the content
/// never needs to be buffered twice (once to hash, once to write).
#[derive(Default)]
pub struct StreamingHasher(Sha256);

impl StreamingHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Checksum {
        Checksum(self.0.finalize().into())
    }
}

/// Appends `value` to `out` as a LEB128 varuint64, the encoding used by the
/// static-delta operation stream's `offset`/`size` fields.
pub fn write_varuint64(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Reads a varuint64 from `data` starting at `*pos`, advancing `*pos` past
/// it. Rejects truncated input and overlong (more than 10 bytes, i.e. more
/// than 70 bits) encodings as `InvalidFormat`.
pub fn read_varuint64(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for i in 0.. {
        if i >= 10 {
            return Err(Error::invalid_format("varuint64 overlong encoding"));
        }
        let byte = *data
            .get(*pos)
            .ok_or_else(|| Error::invalid_format("varuint64 truncated"))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_hex_roundtrip() {
        let bytes = [7u8; 32];
        let csum = Checksum::from_bytes(bytes);
        let hex = csum.hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Checksum::from_hex(&hex).unwrap(), csum);
    }

    #[test]
    fn checksum_from_hex_rejects_bad_length() {
        assert!(Checksum::from_hex("abc").is_err());
    }

    #[test]
    fn checksum_of_is_stable() {
        assert_eq!(Checksum::of(b"hello"), Checksum::of(b"hello"));
        assert_ne!(Checksum::of(b"hello"), Checksum::of(b"world"));
    }

    #[test_case::test_case(0)]
    #[test_case::test_case(1)]
    #[test_case::test_case(127)]
    #[test_case::test_case(128)]
    #[test_case::test_case(300)]
    #[test_case::test_case(u64::MAX)]
    fn varuint64_roundtrip(value: u64) {
        let mut buf = Vec::new();
        write_varuint64(&mut buf, value);
        let mut pos = 0;
        assert_eq!(read_varuint64(&buf, &mut pos).unwrap(), value);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn varuint64_truncated_is_invalid_format() {
        let mut buf = Vec::new();
        write_varuint64(&mut buf, 1000);
        buf.truncate(1);
        let mut pos = 0;
        assert!(read_varuint64(&buf, &mut pos).is_err());
    }
}
