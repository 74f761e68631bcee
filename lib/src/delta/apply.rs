//! The offline static-delta applier: verify, decode, and write the objects
//! introduced by a delta. Never touches the network — a delta downloaded by
//! the pull engine is staged under `remote-cache/` and applied through this
//! exact same code path.

use camino::Utf8Path;

use crate::checksum::Checksum;
use crate::delta::format::Part;
use crate::delta::format::PartHeader;
use crate::delta::format::Superblock;
use crate::error::Error;
use crate::error::Result;
use crate::objects::ObjectType;
use crate::repo::Repo;
use crate::store::LooseObjectStore;

/// Applies the delta staged in `dir` (containing `meta` and numbered
/// parts `0`, `1`, ...) against `repo`. Returns the parsed superblock so
/// the caller can update refs or report progress.
///
/// When `skip_validation` is set, part checksums are not verified against
/// the superblock before decoding — used only when the delta's integrity
/// was already established by an outer signature check.
pub fn apply(dir: &Utf8Path, repo: &Repo, skip_validation: bool) -> Result<Superblock> {
    use crate::error::WithPhase as _;
    apply_inner(dir, repo, skip_validation).with_phase(|| format!("applying delta staged at {dir}"))
}

fn apply_inner(dir: &Utf8Path, repo: &Repo, skip_validation: bool) -> Result<Superblock> {
    let meta_path = dir.join("meta");
    let meta_bytes = std::fs::read(&meta_path).map_err(|e| Error::io(&meta_path, e))?;
    let superblock = Superblock::decode(&meta_bytes)?;

    let store = repo.store();

    // The `to` commit is embedded rather than packed into a part; persist
    // it directly so the delta is self-contained.
    let to_commit_bytes = superblock.to_commit.encode();
    let actual = store.write_metadata(ObjectType::Commit, &to_commit_bytes)?;
    if actual != superblock.to {
        return Err(Error::ChecksumMismatch {
            object_type: ObjectType::Commit,
            expected: superblock.to,
            actual,
        });
    }

    for (index, header) in superblock.parts.iter().enumerate() {
        if Superblock::part_have_all_objects(header, |kind, csum| store.has_object(kind, csum))? {
            continue;
        }

        let part_path = dir.join(index.to_string());
        let part_bytes = std::fs::read(&part_path).map_err(|e| Error::io(&part_path, e))?;
        apply_part(store, header, &part_bytes, skip_validation)?;
    }

    Ok(superblock)
}

/// Verifies (unless `skip_validation`) a single part's on-disk checksum,
/// decodes it, and writes every object it names. Shared by the offline
/// applier above and the pull engine's fetch-time delta path.
pub fn apply_part(
    store: &LooseObjectStore,
    header: &PartHeader,
    part_bytes: &[u8],
    skip_validation: bool,
) -> Result<()> {
    if !skip_validation {
        let actual = Checksum::of(part_bytes);
        if actual != header.checksum {
            return Err(Error::ChecksumMismatch {
                object_type: ObjectType::File,
                expected: header.checksum,
                actual,
            });
        }
    }

    let part = Part::decode(part_bytes)?;
    let objects = part.payload.reconstruct_objects()?;
    if objects.len() != header.objects.len() {
        return Err(Error::invalid_format(format!(
            "part operation stream produced {} objects, header names {}",
            objects.len(),
            header.objects.len()
        )));
    }

    for (object_ref, bytes) in header.objects.iter().zip(objects.iter()) {
        let actual = if object_ref.kind == ObjectType::File {
            store.write_file_bytes(bytes)?
        } else {
            store.write_metadata(object_ref.kind, bytes)?
        };
        if actual != object_ref.checksum {
            return Err(Error::ChecksumMismatch {
                object_type: object_ref.kind,
                expected: object_ref.checksum,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::RepoMode;
    use crate::delta::generate::GenerateOptions;
    use crate::delta::generate::generate;
    use crate::objects::Commit;
    use crate::objects::DirMeta;
    use crate::objects::DirTree;
    use crate::objects::FileHeader;
    use crate::objects::MetadataMap;
    use crate::traverse::traverse_commit;

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
    fn apply_reproduces_to_commits_reachable_set() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let from = commit_file(&src_repo, None, b"v1");
        let to = commit_file(&src_repo, Some(from), b"v2");

        let options = GenerateOptions {
            timestamp: Some(0),
            ..Default::default()
        };
        generate(&src_repo, Some(from), to, &options).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        let dst_repo = Repo::create(dst_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();
        // Seed dst with `from`'s objects by copying the loose files directly.
        copy_dir_recursive(&src_path.join("objects"), &dst_path.join("objects"));

        let delta_dir = src_path.join("deltas").join(from.hex()).join(to.hex());
        let superblock = apply(&delta_dir, &dst_repo, false).unwrap();
        assert_eq!(superblock.to, to);

        let expected = traverse_commit(src_repo.store(), &to).unwrap();
        let actual = traverse_commit(dst_repo.store(), &to).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn apply_detects_corrupted_part() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let to = commit_file(&src_repo, None, b"only-version");
        let options = GenerateOptions {
            timestamp: Some(0),
            ..Default::default()
        };
        generate(&src_repo, None, to, &options).unwrap();

        let delta_dir = src_path.join("deltas").join(to.hex());
        let part_path = delta_dir.join("0");
        let mut bytes = std::fs::read(&part_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&part_path, bytes).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        let dst_repo = Repo::create(dst_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();

        let err = apply(&delta_dir, &dst_repo, false).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    fn copy_dir_recursive(src: &Utf8Path, dst: &Utf8Path) {
        std::fs::create_dir_all(dst).unwrap();
        for entry in std::fs::read_dir(src).unwrap() {
            let entry = entry.unwrap();
            let file_type = entry.file_type().unwrap();
            let name = entry.file_name();
            let name = name.to_str().unwrap();
            let src_child = src.join(name);
            let dst_child = dst.join(name);
            if file_type.is_dir() {
                copy_dir_recursive(&src_child, &dst_child);
            } else {
                std::fs::copy(&src_child, &dst_child).unwrap();
            }
        }
    }
}
