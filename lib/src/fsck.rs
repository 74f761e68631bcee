//! Loose-object checksum verification: walk every object a store holds,
//! recompute its content address from the on-disk bytes, and report
//! whichever ones don't match their own file name.

use crate::checksum::Checksum;
use crate::error::Error;
use crate::error::Result;
use crate::objects::ObjectType;
use crate::store::LooseObjectStore;

/// One object whose on-disk bytes don't hash back to their own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub object_type: ObjectType,
    pub checksum: Checksum,
    /// The checksum actually computed from the bytes on disk, when they
    /// could be decoded at all (a `File` object whose compressed stream
    /// itself doesn't decompress has no meaningful rehash to report).
    pub actual: Option<Checksum>,
}

/// The outcome of walking a store once.
#[derive(Debug, Default, Clone)]
pub struct FsckReport {
    pub checked: usize,
    pub corrupt: Vec<Corruption>,
    pub deleted: Vec<(ObjectType, Checksum)>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Walks every loose object in `store`, recomputing each one's checksum
/// the same way the writer that produced it would have. When `delete` is
/// set, corrupt objects are unlinked as they're found.
pub fn fsck(store: &LooseObjectStore, delete: bool) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    for (object_type, checksum) in store.list_loose()? {
        report.checked += 1;
        let recomputed = if object_type == ObjectType::File {
            store.load_file_object_bytes(&checksum).map(|bytes| Checksum::of(&bytes))
        } else {
            store.load_object(object_type, &checksum).map(|bytes| Checksum::of(&bytes))
        };
        let actual = match recomputed {
            Ok(actual) if actual == checksum => continue,
            Ok(actual) => Some(actual),
            Err(Error::InvalidFormat(_)) => None,
            Err(e) => return Err(e),
        };
        report.corrupt.push(Corruption {
            object_type,
            checksum,
            actual,
        });
        if delete {
            store.delete_object(object_type, &checksum)?;
            report.deleted.push((object_type, checksum));
        }
    }
    Ok(report)
}
