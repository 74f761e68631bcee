//! Shared binary-codec primitives used by both the object model
//! ([`crate::objects`]) and the static-delta format
//! ([`crate::delta::format`]): a length-prefixed byte reader plus the
//! little-endian integer/string/checksum helpers both formats build on.

use crate::checksum::Checksum;
use crate::error::Error;
use crate::error::Result;

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) {
    put_bytes(out, s.as_bytes());
}

pub(crate) fn put_checksum(out: &mut Vec<u8>, csum: &Checksum) {
    out.extend_from_slice(csum.as_bytes());
}

pub(crate) fn put_optional_checksum(out: &mut Vec<u8>, csum: Option<&Checksum>) {
    match csum {
        Some(csum) => {
            out.push(1);
            put_checksum(out, csum);
        }
        None => out.push(0),
    }
}

/// A cursor over a byte slice with length-checked, trailing-byte-rejecting
/// reads. Every object-kind and delta-structure decoder is built on this.
pub(crate) struct Reader<'a> {
    pub(crate) data: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::invalid_format("length overflow"))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::invalid_format("unexpected end of data"))?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?).map_err(|e| Error::invalid_format(format!("invalid UTF-8: {e}")))
    }

    pub(crate) fn checksum(&mut self) -> Result<Checksum> {
        let bytes: [u8; 32] = self.take(32)?.try_into().unwrap();
        Ok(Checksum::from_bytes(bytes))
    }

    pub(crate) fn optional_checksum(&mut self) -> Result<Option<Checksum>> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.checksum()?)),
            tag => Err(Error::invalid_format(format!("invalid optional-checksum tag {tag}"))),
        }
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::invalid_format("trailing bytes after structure"));
        }
        Ok(())
    }
}
