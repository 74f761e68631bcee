//! Binary layout of the static-delta superblock and parts.
//!
//! All multi-byte integers are little-endian except the superblock
//! timestamp, which is big-endian to match the commit object's own
//! timestamp encoding. Decoders reject trailing bytes, same discipline as
//! [`crate::objects`].

use crate::checksum::Checksum;
use crate::checksum::read_varuint64;
use crate::checksum::write_varuint64;
use crate::codec::Reader;
use crate::codec::put_bytes;
use crate::codec::put_checksum;
use crate::codec::put_u32;
use crate::codec::put_u64;
use crate::error::Error;
use crate::error::Result;
use crate::objects::Commit;
use crate::objects::MetadataMap;
use crate::objects::ObjectType;
use crate::objects::decode_metadata;
use crate::objects::encode_metadata;

/// An object's position inside a part: kind tag + checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartObjectRef {
    pub kind: ObjectType,
    pub checksum: Checksum,
}

fn kind_tag(kind: ObjectType) -> u8 {
    match kind {
        ObjectType::Commit => 0,
        ObjectType::DirTree => 1,
        ObjectType::DirMeta => 2,
        ObjectType::File => 3,
    }
}

fn kind_from_tag(tag: u8) -> Result<ObjectType> {
    Ok(match tag {
        0 => ObjectType::Commit,
        1 => ObjectType::DirTree,
        2 => ObjectType::DirMeta,
        3 => ObjectType::File,
        other => return Err(Error::invalid_format(format!("invalid object kind tag {other}"))),
    })
}

fn encode_object_refs(out: &mut Vec<u8>, refs: &[PartObjectRef]) {
    let mut packed = Vec::new();
    for object_ref in refs {
        packed.push(kind_tag(object_ref.kind));
        put_checksum(&mut packed, &object_ref.checksum);
    }
    put_bytes(out, &packed);
}

fn decode_object_refs(r: &mut Reader<'_>) -> Result<Vec<PartObjectRef>> {
    let packed = r.bytes()?;
    let mut pr = Reader::new(&packed);
    let mut out = Vec::new();
    while pr.pos < pr.data.len() {
        let kind = kind_from_tag(pr.u8()?)?;
        let checksum = pr.checksum()?;
        out.push(PartObjectRef { kind, checksum });
    }
    Ok(out)
}

/// One part's header entry (superblock field 7): the part's on-disk
/// checksum, its sizes, and the objects it contains, in the order they
/// appear in the part's operation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeader {
    pub checksum: Checksum,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub objects: Vec<PartObjectRef>,
}

impl PartHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        put_checksum(out, &self.checksum);
        put_u64(out, self.compressed_size);
        put_u64(out, self.uncompressed_size);
        encode_object_refs(out, &self.objects);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            checksum: r.checksum()?,
            compressed_size: r.u64()?,
            uncompressed_size: r.u64()?,
            objects: decode_object_refs(r)?,
        })
    }
}

/// A fallback entry (superblock field 8): an object too large for a part,
/// fetched as an ordinary loose object instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackHeader {
    pub kind: ObjectType,
    pub checksum: Checksum,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl FallbackHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(kind_tag(self.kind));
        put_checksum(out, &self.checksum);
        put_u64(out, self.compressed_size);
        put_u64(out, self.uncompressed_size);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            kind: kind_from_tag(r.u8()?)?,
            checksum: r.checksum()?,
            compressed_size: r.u64()?,
            uncompressed_size: r.u64()?,
        })
    }
}

/// The static-delta superblock, persisted at `deltas/<from>/<to>/meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub metadata: MetadataMap,
    /// Seconds since the Unix epoch, big-endian on the wire.
    pub timestamp: i64,
    /// Empty for a from-scratch delta.
    pub from: Option<Checksum>,
    pub to: Checksum,
    /// The entire `to` commit object, embedded to spare a separate fetch.
    pub to_commit: Commit,
    pub reserved: Vec<u8>,
    pub parts: Vec<PartHeader>,
    pub fallbacks: Vec<FallbackHeader>,
}

impl Superblock {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_metadata(&mut out, &self.metadata);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        match &self.from {
            Some(csum) => put_checksum(&mut out, csum),
            None => out.extend_from_slice(&[0u8; 32]),
        }
        put_checksum(&mut out, &self.to);
        put_bytes(&mut out, &self.to_commit.encode());
        put_bytes(&mut out, &self.reserved);
        put_u32(&mut out, self.parts.len() as u32);
        for part in &self.parts {
            part.encode(&mut out);
        }
        put_u32(&mut out, self.fallbacks.len() as u32);
        for fallback in &self.fallbacks {
            fallback.encode(&mut out);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let metadata = decode_metadata(&mut r)?;
        let timestamp = r.u64_be()? as i64;
        let from_bytes = r.checksum()?;
        let from = if from_bytes.as_bytes() == &[0u8; 32] {
            None
        } else {
            Some(from_bytes)
        };
        let to = r.checksum()?;
        let to_commit = Commit::decode(&r.bytes()?)?;
        let reserved = r.bytes()?;
        let n_parts = r.u32()?;
        let mut parts = Vec::with_capacity(n_parts as usize);
        for _ in 0..n_parts {
            parts.push(PartHeader::decode(&mut r)?);
        }
        let n_fallbacks = r.u32()?;
        let mut fallbacks = Vec::with_capacity(n_fallbacks as usize);
        for _ in 0..n_fallbacks {
            fallbacks.push(FallbackHeader::decode(&mut r)?);
        }
        r.finish()?;
        Ok(Self {
            metadata,
            timestamp,
            from,
            to,
            to_commit,
            reserved,
            parts,
            fallbacks,
        })
    }

    /// Whether every object named by `part.objects` is already present in
    /// the target store.
    pub fn part_have_all_objects(
        part: &PartHeader,
        has_object: impl Fn(ObjectType, &Checksum) -> Result<bool>,
    ) -> Result<bool> {
        for object_ref in &part.objects {
            if !has_object(object_ref.kind, &object_ref.checksum)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A part's compression codec (superblock part payload byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzma,
    Gzip,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lzma => b'x',
            Self::Gzip => b'g',
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::None,
            b'x' => Self::Lzma,
            b'g' => Self::Gzip,
            other => return Err(Error::invalid_format(format!("invalid part compression tag {other}"))),
        })
    }
}

/// One operation in a part's operation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write { offset: u64, size: u64 },
    Close,
}

const OP_WRITE: u8 = 0;
const OP_CLOSE: u8 = 1;

fn encode_operations(out: &mut Vec<u8>, ops: &[Operation]) {
    for op in ops {
        match op {
            Operation::Write { offset, size } => {
                out.push(OP_WRITE);
                write_varuint64(out, *offset);
                write_varuint64(out, *size);
            }
            Operation::Close => out.push(OP_CLOSE),
        }
    }
}

fn decode_operations(data: &[u8], pos: &mut usize) -> Result<Vec<Operation>> {
    let mut ops = Vec::new();
    while *pos < data.len() {
        let tag = *data
            .get(*pos)
            .ok_or_else(|| Error::invalid_format("truncated operation stream"))?;
        *pos += 1;
        match tag {
            OP_WRITE => {
                let offset = read_varuint64(data, pos)?;
                let size = read_varuint64(data, pos)?;
                ops.push(Operation::Write { offset, size });
            }
            OP_CLOSE => ops.push(Operation::Close),
            other => return Err(Error::invalid_format(format!("invalid operation tag {other}"))),
        }
    }
    Ok(ops)
}

/// A part's decoded payload: the raw bytes new objects were sliced from,
/// plus the operation stream that reconstructs each object's content in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPayload {
    pub payload_bytes: Vec<u8>,
    pub operations: Vec<Operation>,
}

impl PartPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes(&mut out, &self.payload_bytes);
        let mut ops = Vec::new();
        encode_operations(&mut ops, &self.operations);
        put_bytes(&mut out, &ops);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let payload_bytes = r.bytes()?;
        let op_bytes = r.bytes()?;
        r.finish()?;
        let mut pos = 0;
        let operations = decode_operations(&op_bytes, &mut pos)?;
        Ok(Self {
            payload_bytes,
            operations,
        })
    }

    /// Replays the operation stream, yielding the reconstructed bytes of
    /// each object in the order the part's object list names them.
    pub fn reconstruct_objects(&self) -> Result<Vec<Vec<u8>>> {
        let mut objects = Vec::new();
        let mut current = Vec::new();
        for op in &self.operations {
            match op {
                Operation::Write { offset, size } => {
                    let start = usize::try_from(*offset)
                        .map_err(|_| Error::invalid_format("operation offset overflow"))?;
                    let len = usize::try_from(*size)
                        .map_err(|_| Error::invalid_format("operation size overflow"))?;
                    let end = start
                        .checked_add(len)
                        .ok_or_else(|| Error::invalid_format("operation range overflow"))?;
                    let slice = self
                        .payload_bytes
                        .get(start..end)
                        .ok_or_else(|| Error::invalid_format("operation range out of bounds"))?;
                    current.extend_from_slice(slice);
                }
                Operation::Close => objects.push(std::mem::take(&mut current)),
            }
        }
        Ok(objects)
    }
}

/// An on-disk part file's outer framing: a one-byte compression tag
/// followed by the (possibly compressed) [`PartPayload`] encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub compression: Compression,
    pub payload: PartPayload,
}

impl Part {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let raw = self.payload.encode();
        let compressed = match self.compression {
            Compression::None => raw,
            Compression::Lzma => compress_lzma(&raw)?,
            Compression::Gzip => compress_gzip(&raw)?,
        };
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(self.compression.tag());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&tag, rest) = data
            .split_first()
            .ok_or_else(|| Error::invalid_format("empty part file"))?;
        let compression = Compression::from_tag(tag)?;
        let raw = match compression {
            Compression::None => rest.to_vec(),
            Compression::Lzma => decompress_lzma(rest)?,
            Compression::Gzip => decompress_gzip(rest)?,
        };
        let payload = PartPayload::decode(&raw)?;
        Ok(Self { compression, payload })
    }
}

fn compress_lzma(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write as _;
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder
        .write_all(data)
        .map_err(|e| Error::invalid_format(format!("lzma compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::invalid_format(format!("lzma compress failed: {e}")))
}

fn decompress_lzma(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read as _;
    let mut decoder = xz2::read::XzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid_format(format!("lzma decompress failed: {e}")))?;
    Ok(out)
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write as _;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::invalid_format(format!("gzip compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::invalid_format(format!("gzip compress failed: {e}")))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read as _;
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid_format(format!("gzip decompress failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::MetadataValue;

    fn csum(byte: u8) -> Checksum {
        Checksum::from_bytes([byte; 32])
    }

    fn sample_commit() -> Commit {
        Commit {
            metadata: MetadataMap::new(),
            parent: None,
            related_objects: vec![],
            subject: "to".into(),
            body: String::new(),
            timestamp: 0,
            root_dirtree: csum(9),
            root_dirmeta: csum(10),
        }
    }

    #[test]
    fn superblock_roundtrip_with_from() {
        let mut metadata = MetadataMap::new();
        metadata.insert("key".into(), MetadataValue::Str("value".into()));
        let superblock = Superblock {
            metadata,
            timestamp: 1_700_000_000,
            from: Some(csum(1)),
            to: csum(2),
            to_commit: sample_commit(),
            reserved: vec![],
            parts: vec![PartHeader {
                checksum: csum(3),
                compressed_size: 10,
                uncompressed_size: 20,
                objects: vec![PartObjectRef {
                    kind: ObjectType::File,
                    checksum: csum(4),
                }],
            }],
            fallbacks: vec![FallbackHeader {
                kind: ObjectType::DirTree,
                checksum: csum(5),
                compressed_size: 1,
                uncompressed_size: 2,
            }],
        };
        let encoded = superblock.encode();
        let decoded = Superblock::decode(&encoded).unwrap();
        assert_eq!(decoded, superblock);
    }

    #[test]
    fn superblock_roundtrip_from_scratch() {
        let superblock = Superblock {
            metadata: MetadataMap::new(),
            timestamp: 0,
            from: None,
            to: csum(2),
            to_commit: sample_commit(),
            reserved: vec![1, 2, 3],
            parts: vec![],
            fallbacks: vec![],
        };
        let decoded = Superblock::decode(&superblock.encode()).unwrap();
        assert_eq!(decoded.from, None);
    }

    #[test]
    fn part_payload_reconstructs_objects_in_order() {
        let payload = PartPayload {
            payload_bytes: b"helloworld".to_vec(),
            operations: vec![
                Operation::Write { offset: 0, size: 5 },
                Operation::Close,
                Operation::Write { offset: 5, size: 5 },
                Operation::Close,
            ],
        };
        let objects = payload.reconstruct_objects().unwrap();
        assert_eq!(objects, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn part_payload_roundtrip() {
        let payload = PartPayload {
            payload_bytes: b"abc".to_vec(),
            operations: vec![Operation::Write { offset: 0, size: 3 }, Operation::Close],
        };
        let encoded = payload.encode();
        assert_eq!(PartPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn part_roundtrips_uncompressed() {
        let part = Part {
            compression: Compression::None,
            payload: PartPayload {
                payload_bytes: b"xyz".to_vec(),
                operations: vec![Operation::Write { offset: 0, size: 3 }, Operation::Close],
            },
        };
        let encoded = part.encode().unwrap();
        let decoded = Part::decode(&encoded).unwrap();
        assert_eq!(decoded, part);
    }

    #[test]
    fn part_roundtrips_lzma_compressed() {
        let part = Part {
            compression: Compression::Lzma,
            payload: PartPayload {
                payload_bytes: b"some repeated repeated repeated content".to_vec(),
                operations: vec![Operation::Write { offset: 0, size: 39 }, Operation::Close],
            },
        };
        let encoded = part.encode().unwrap();
        assert_eq!(encoded[0], b'x');
        let decoded = Part::decode(&encoded).unwrap();
        assert_eq!(decoded, part);
    }

    #[test]
    fn part_have_all_objects() {
        let header = PartHeader {
            checksum: csum(1),
            compressed_size: 0,
            uncompressed_size: 0,
            objects: vec![
                PartObjectRef {
                    kind: ObjectType::File,
                    checksum: csum(2),
                },
                PartObjectRef {
                    kind: ObjectType::File,
                    checksum: csum(3),
                },
            ],
        };
        let present = [csum(2)];
        assert!(!Superblock::part_have_all_objects(&header, |_, c| Ok(present.contains(c))).unwrap());
        let present = [csum(2), csum(3)];
        assert!(Superblock::part_have_all_objects(&header, |_, c| Ok(present.contains(c))).unwrap());
    }
}
