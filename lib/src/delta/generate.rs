//! The static-delta generator: diff `FROM -> TO`, pack new objects into
//! size-bounded parts, compress, checksum, and persist.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use camino::Utf8PathBuf;

use crate::checksum::Checksum;
use crate::delta::format::Compression;
use crate::delta::format::FallbackHeader;
use crate::delta::format::Operation;
use crate::delta::format::Part;
use crate::delta::format::PartHeader;
use crate::delta::format::PartObjectRef;
use crate::delta::format::PartPayload;
use crate::delta::format::Superblock;
use crate::error::Error;
use crate::error::Result;
use crate::file_util::persist_content_addressed_temp_file;
use crate::objects::Commit;
use crate::objects::MetadataMap;
use crate::objects::ObjectType;
use crate::repo::Repo;
use crate::store::LooseObjectStore;
use crate::traverse::traverse_commit;

/// Parameters for [`generate`]. `max_part_size_bytes` bounds both how large
/// a single part's payload may grow and the per-object cutoff above which
/// an object is moved to the fallback list instead of being packed.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_part_size_bytes: u32,
    pub compression: Compression,
    pub metadata: MetadataMap,
    /// Overrides the superblock timestamp; `None` uses the current time.
    /// Tests fix this to get a deterministic superblock encoding.
    pub timestamp: Option<i64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_part_size_bytes: 128 << 20,
            compression: Compression::Lzma,
            metadata: MetadataMap::new(),
            timestamp: None,
        }
    }
}

fn object_uncompressed_len(store: &LooseObjectStore, kind: ObjectType, checksum: &Checksum) -> Result<u64> {
    let len = if kind == ObjectType::File {
        store.load_file_object_bytes(checksum)?.len()
    } else {
        store.load_object(kind, checksum)?.len()
    };
    Ok(len as u64)
}

struct PendingPart {
    payload_bytes: Vec<u8>,
    operations: Vec<Operation>,
    objects: Vec<PartObjectRef>,
}

impl PendingPart {
    fn new() -> Self {
        Self {
            payload_bytes: Vec::new(),
            operations: Vec::new(),
            objects: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn push_object(&mut self, kind: ObjectType, checksum: Checksum, bytes: &[u8]) {
        let offset = self.payload_bytes.len() as u64;
        self.payload_bytes.extend_from_slice(bytes);
        self.operations.push(Operation::Write {
            offset,
            size: bytes.len() as u64,
        });
        self.operations.push(Operation::Close);
        self.objects.push(PartObjectRef { kind, checksum });
    }
}

/// Generates (and persists under `deltas/<from>/<to>/`) the static delta
/// for the commit transition `from -> to`. `from` is `None` for a
/// from-scratch delta.
pub fn generate(repo: &Repo, from: Option<Checksum>, to: Checksum, options: &GenerateOptions) -> Result<Superblock> {
    use crate::error::WithPhase as _;
    generate_inner(repo, from, to, options).with_phase(|| format!("generating delta to {to}"))
}

fn generate_inner(repo: &Repo, from: Option<Checksum>, to: Checksum, options: &GenerateOptions) -> Result<Superblock> {
    let store = repo.store();

    let to_bytes = store.load_object(ObjectType::Commit, &to)?;
    let to_commit = Commit::decode(&to_bytes)?;

    let to_reachable = traverse_commit(store, &to)?;
    let from_reachable = match from {
        Some(from_csum) => traverse_commit(store, &from_csum)?,
        None => Default::default(),
    };

    let new: Vec<(Checksum, ObjectType)> = to_reachable
        .difference(&from_reachable)
        .copied()
        .filter(|(csum, kind)| !(*kind == ObjectType::Commit && *csum == to))
        .collect();
    // Metadata first, then content, each sorted by checksum so the packing
    // order — and therefore the part boundaries — is deterministic.
    let mut new_objects: Vec<(Checksum, ObjectType)> =
        new.iter().copied().filter(|(_, kind)| kind.is_metadata()).collect();
    new_objects.sort();
    let mut new_content: Vec<(Checksum, ObjectType)> =
        new.into_iter().filter(|(_, kind)| !kind.is_metadata()).collect();
    new_content.sort();
    new_objects.extend(new_content);

    let max_size = u64::from(options.max_part_size_bytes);
    let mut fallbacks = Vec::new();
    let mut to_pack = Vec::new();
    for (csum, kind) in new_objects {
        let len = object_uncompressed_len(store, kind, &csum)?;
        if len > max_size {
            fallbacks.push((kind, csum));
        } else {
            to_pack.push((kind, csum, len));
        }
    }

    let mut sealed_parts: Vec<PendingPart> = Vec::new();
    let mut current = PendingPart::new();
    for (kind, csum, _len) in to_pack {
        let bytes = if kind == ObjectType::File {
            store.load_file_object_bytes(&csum)?
        } else {
            store.load_object(kind, &csum)?
        };
        if !current.is_empty() && (current.payload_bytes.len() + bytes.len()) as u64 > max_size {
            sealed_parts.push(std::mem::replace(&mut current, PendingPart::new()));
        }
        current.push_object(kind, csum, &bytes);
    }
    if !current.is_empty() {
        sealed_parts.push(current);
    }

    let from_hex = from.map(|c| c.hex()).unwrap_or_default();
    let to_hex = to.hex();
    let delta_dir = repo.deltas_dir().join(&from_hex).join(&to_hex);
    std::fs::create_dir_all(&delta_dir).map_err(|e| Error::io(&delta_dir, e))?;
    std::fs::create_dir_all(repo.tmp_dir()).map_err(|e| Error::io(repo.tmp_dir(), e))?;

    let mut part_headers = Vec::with_capacity(sealed_parts.len());
    for (index, pending) in sealed_parts.into_iter().enumerate() {
        let uncompressed_size = pending.payload_bytes.len() as u64;
        let part = Part {
            compression: options.compression,
            payload: PartPayload {
                payload_bytes: pending.payload_bytes,
                operations: pending.operations,
            },
        };
        let encoded = part.encode()?;
        let checksum = Checksum::of(&encoded);
        let dest = delta_dir.join(index.to_string());
        write_atomic(repo.tmp_dir(), &dest, &encoded)?;
        part_headers.push(PartHeader {
            checksum,
            compressed_size: encoded.len() as u64,
            uncompressed_size,
            objects: pending.objects,
        });
    }

    let mut fallback_headers = Vec::with_capacity(fallbacks.len());
    for (kind, csum) in fallbacks {
        let compressed_size = store.query_storage_size(kind, &csum)?;
        let uncompressed_size = object_uncompressed_len(store, kind, &csum)?;
        fallback_headers.push(FallbackHeader {
            kind,
            checksum: csum,
            compressed_size,
            uncompressed_size,
        });
    }

    let timestamp = options.timestamp.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    });

    let superblock = Superblock {
        metadata: options.metadata.clone(),
        timestamp,
        from,
        to,
        to_commit,
        reserved: Vec::new(),
        parts: part_headers,
        fallbacks: fallback_headers,
    };

    let meta_path = delta_dir.join("meta");
    write_atomic(repo.tmp_dir(), &meta_path, &superblock.encode())?;

    Ok(superblock)
}

fn write_atomic(tmp_dir: Utf8PathBuf, dest: &camino::Utf8Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write as _;
    let mut temp_file = tempfile::NamedTempFile::new_in(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;
    temp_file.write_all(bytes).map_err(|e| Error::io(dest, e))?;
    persist_content_addressed_temp_file(temp_file, dest).map_err(|e| Error::io(dest, e))
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::RepoMode;
    use crate::objects::DirMeta;
    use crate::objects::DirTree;
    use crate::objects::FileHeader;

    fn commit_file(repo: &Repo, parent: Option<Checksum>, content: &[u8]) -> Checksum {
        let store = repo.store();
        let (uid, gid) = crate::tests::current_uid_gid();
        let header = FileHeader {
            size: content.len() as u64,
            uid,
            gid,
            mode: 0o100644,
            rdev: 0,
            symlink_target: None,
            xattrs: vec![],
        };
        let file_csum = store.write_file(&header, content).unwrap();
        let dirmeta = DirMeta {
            uid: 0,
            gid: 0,
            mode: 0o40755,
            xattrs: vec![],
        };
        let dirmeta_csum = store.write_metadata(ObjectType::DirMeta, &dirmeta.encode()).unwrap();
        let dirtree = DirTree::from_entries(vec![("file".into(), file_csum)], vec![]).unwrap();
        let dirtree_csum = store.write_metadata(ObjectType::DirTree, &dirtree.encode()).unwrap();
        let commit = Commit {
            metadata: MetadataMap::new(),
            parent,
            related_objects: vec![],
            subject: "s".into(),
            body: String::new(),
            timestamp: 0,
            root_dirtree: dirtree_csum,
            root_dirmeta: dirmeta_csum,
        };
        store.write_metadata(ObjectType::Commit, &commit.encode()).unwrap()
    }

    #[test]
    fn generate_packs_new_objects_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let to = commit_file(&repo, None, b"v1");
        let options = GenerateOptions {
            timestamp: Some(0),
            ..Default::default()
        };
        let superblock = generate(&repo, None, to, &options).unwrap();

        assert_eq!(superblock.from, None);
        assert_eq!(superblock.to, to);
        assert!(!superblock.parts.is_empty());
        assert!(superblock.fallbacks.is_empty());
        let total_objects: usize = superblock.parts.iter().map(|p| p.objects.len()).sum();
        // commit excluded (embedded); dirtree + dirmeta + file = 3
        assert_eq!(total_objects, 3);

        assert!(path.join("deltas").join(to.hex()).exists());
    }

    #[test]
    fn generate_from_to_only_packs_the_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let from = commit_file(&repo, None, b"v1");
        let to = commit_file(&repo, Some(from), b"v2");

        let options = GenerateOptions {
            timestamp: Some(0),
            ..Default::default()
        };
        let superblock = generate(&repo, Some(from), to, &options).unwrap();
        assert_eq!(superblock.from, Some(from));
        let total_objects: usize = superblock.parts.iter().map(|p| p.objects.len()).sum();
        // Only the new dirtree, dirmeta (unchanged mode+uid/gid actually
        // reuses the same dirmeta checksum, so not new) and file differ.
        assert!(total_objects >= 2);
    }

    #[test]
    fn oversized_objects_become_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let to = commit_file(&repo, None, b"0123456789");
        let options = GenerateOptions {
            timestamp: Some(0),
            max_part_size_bytes: 1,
            ..Default::default()
        };
        let superblock = generate(&repo, None, to, &options).unwrap();
        assert!(!superblock.fallbacks.is_empty());
    }
}
