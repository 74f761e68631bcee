//! Given a commit, enumerate every metadata and content object reachable
//! from it. Used by the pull engine (to decide what's still missing), the
//! delta generator (to compute `to_reachable - from_reachable`), and `fsck`
//! (to know the expected closure of a ref).

use std::collections::BTreeSet;

use crate::checksum::Checksum;
use crate::error::Error;
use crate::error::Result;
use crate::objects::Commit;
use crate::objects::DirTree;
use crate::objects::ObjectType;
use crate::store::ObjectReader;

/// Directory nesting beyond this depth is rejected as
/// [`Error::RecursionExceeded`] rather than risking a stack overflow on a
/// maliciously crafted or cyclic `DIR_TREE` graph (invariant I4).
pub const MAX_RECURSION_DEPTH: u32 = 256;

pub type ReachableSet = BTreeSet<(Checksum, ObjectType)>;

/// Returns the full set of objects reachable from `commit_checksum`:
/// the commit itself, its root dirtree/dirmeta, and everything those
/// transitively reference.
pub fn traverse_commit(reader: &dyn ObjectReader, commit_checksum: &Checksum) -> Result<ReachableSet> {
    let mut visited = ReachableSet::new();
    visit_commit(reader, commit_checksum, &mut visited, 0)?;
    Ok(visited)
}

/// Like [`traverse_commit`], but only visits objects not already present in
/// `base`, returning the newly-discovered subset. Stops descending into any
/// object already known in `base` (it and everything under it is assumed
/// already accounted for).
pub fn traverse_new_reachable(
    reader: &dyn ObjectReader,
    base: &ReachableSet,
    commit_checksum: &Checksum,
) -> Result<ReachableSet> {
    let mut visited = ReachableSet::new();
    visit_commit_excluding(reader, commit_checksum, base, &mut visited, 0)?;
    Ok(visited)
}

fn check_depth(depth: u32) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionExceeded {
            limit: MAX_RECURSION_DEPTH,
        });
    }
    Ok(())
}

fn visit_commit(
    reader: &dyn ObjectReader,
    checksum: &Checksum,
    visited: &mut ReachableSet,
    depth: u32,
) -> Result<()> {
    check_depth(depth)?;
    let key = (*checksum, ObjectType::Commit);
    if !visited.insert(key) {
        return Ok(());
    }
    let bytes = reader.load_object(ObjectType::Commit, checksum)?;
    let commit = Commit::decode(&bytes)?;
    visit_dirtree(reader, &commit.root_dirtree, visited, depth + 1)?;
    visited.insert((commit.root_dirmeta, ObjectType::DirMeta));
    Ok(())
}

fn visit_dirtree(
    reader: &dyn ObjectReader,
    checksum: &Checksum,
    visited: &mut ReachableSet,
    depth: u32,
) -> Result<()> {
    check_depth(depth)?;
    let key = (*checksum, ObjectType::DirTree);
    if !visited.insert(key) {
        return Ok(());
    }
    let bytes = reader.load_object(ObjectType::DirTree, checksum)?;
    let tree = DirTree::decode(&bytes)?;
    for (_, file_checksum) in &tree.files {
        visited.insert((*file_checksum, ObjectType::File));
    }
    for (_, subtree, submeta) in &tree.dirs {
        visit_dirtree(reader, subtree, visited, depth + 1)?;
        visited.insert((*submeta, ObjectType::DirMeta));
    }
    Ok(())
}

fn visit_commit_excluding(
    reader: &dyn ObjectReader,
    checksum: &Checksum,
    base: &ReachableSet,
    visited: &mut ReachableSet,
    depth: u32,
) -> Result<()> {
    check_depth(depth)?;
    let key = (*checksum, ObjectType::Commit);
    if base.contains(&key) || !visited.insert(key) {
        return Ok(());
    }
    let bytes = reader.load_object(ObjectType::Commit, checksum)?;
    let commit = Commit::decode(&bytes)?;
    visit_dirtree_excluding(reader, &commit.root_dirtree, base, visited, depth + 1)?;
    let meta_key = (commit.root_dirmeta, ObjectType::DirMeta);
    if !base.contains(&meta_key) {
        visited.insert(meta_key);
    }
    Ok(())
}

fn visit_dirtree_excluding(
    reader: &dyn ObjectReader,
    checksum: &Checksum,
    base: &ReachableSet,
    visited: &mut ReachableSet,
    depth: u32,
) -> Result<()> {
    check_depth(depth)?;
    let key = (*checksum, ObjectType::DirTree);
    if base.contains(&key) || !visited.insert(key) {
        return Ok(());
    }
    let bytes = reader.load_object(ObjectType::DirTree, checksum)?;
    let tree = DirTree::decode(&bytes)?;
    for (_, file_checksum) in &tree.files {
        let file_key = (*file_checksum, ObjectType::File);
        if !base.contains(&file_key) {
            visited.insert(file_key);
        }
    }
    for (_, subtree, submeta) in &tree.dirs {
        visit_dirtree_excluding(reader, subtree, base, visited, depth + 1)?;
        let meta_key = (*submeta, ObjectType::DirMeta);
        if !base.contains(&meta_key) {
            visited.insert(meta_key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::RepoMode;
    use crate::objects::DirMeta;
    use crate::objects::MetadataMap;
    use crate::store::LooseObjectStore;

    fn new_store() -> (tempfile::TempDir, LooseObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let store = LooseObjectStore::new(path, RepoMode::Bare, true, None);
        (dir, store)
    }

    fn write_commit(store: &LooseObjectStore, root_dirtree: Checksum, root_dirmeta: Checksum) -> Checksum {
        let commit = Commit {
            metadata: MetadataMap::new(),
            parent: None,
            related_objects: vec![],
            subject: "s".into(),
            body: String::new(),
            timestamp: 0,
            root_dirtree,
            root_dirmeta,
        };
        store.write_metadata(ObjectType::Commit, &commit.encode()).unwrap()
    }

    #[test]
    fn traverses_commit_with_nested_dirs_and_files() {
        let (_dir, store) = new_store();

        let (uid, gid) = crate::tests::current_uid_gid();
        let file_header = crate::objects::FileHeader {
            size: 3,
            uid,
            gid,
            mode: 0o100644,
            rdev: 0,
            symlink_target: None,
            xattrs: vec![],
        };
        let file_csum = store.write_file(&file_header, b"hi\n").unwrap();

        let leaf_meta = DirMeta {
            uid: 0,
            gid: 0,
            mode: 0o40755,
            xattrs: vec![],
        };
        let leaf_meta_csum = store.write_metadata(ObjectType::DirMeta, &leaf_meta.encode()).unwrap();

        let subtree = DirTree::from_entries(vec![("hello".into(), file_csum)], vec![]).unwrap();
        let subtree_csum = store.write_metadata(ObjectType::DirTree, &subtree.encode()).unwrap();

        let root_meta_csum = store
            .write_metadata(ObjectType::DirMeta, &leaf_meta.encode())
            .unwrap();
        assert_eq!(root_meta_csum, leaf_meta_csum);

        let root_tree = DirTree::from_entries(vec![], vec![("sub".into(), subtree_csum, leaf_meta_csum)]).unwrap();
        let root_tree_csum = store.write_metadata(ObjectType::DirTree, &root_tree.encode()).unwrap();

        let commit_csum = write_commit(&store, root_tree_csum, root_meta_csum);

        let reachable = traverse_commit(&store, &commit_csum).unwrap();
        assert!(reachable.contains(&(commit_csum, ObjectType::Commit)));
        assert!(reachable.contains(&(root_tree_csum, ObjectType::DirTree)));
        assert!(reachable.contains(&(subtree_csum, ObjectType::DirTree)));
        assert!(reachable.contains(&(file_csum, ObjectType::File)));
        assert!(reachable.contains(&(leaf_meta_csum, ObjectType::DirMeta)));
        // commit + 2 dirtrees + 1 dirmeta + 1 file
        assert_eq!(reachable.len(), 5);
    }

    #[test]
    fn new_reachable_excludes_base_set() {
        let (_dir, store) = new_store();
        let meta = DirMeta::default();
        let meta_csum = store.write_metadata(ObjectType::DirMeta, &meta.encode()).unwrap();
        let tree = DirTree::default();
        let tree_csum = store.write_metadata(ObjectType::DirTree, &tree.encode()).unwrap();
        let commit_csum = write_commit(&store, tree_csum, meta_csum);

        let full = traverse_commit(&store, &commit_csum).unwrap();
        let empty_base = ReachableSet::new();
        let new = traverse_new_reachable(&store, &empty_base, &commit_csum).unwrap();
        assert_eq!(new, full);

        let new_against_self = traverse_new_reachable(&store, &full, &commit_csum).unwrap();
        assert!(new_against_self.is_empty());
    }

    #[test]
    fn cyclic_dirtree_hits_recursion_bound() {
        let (_dir, store) = new_store();
        // Build a chain of MAX_RECURSION_DEPTH + 10 nested single-entry dirs,
        // each legitimately hashed (no real cycle is possible since DAGs of
        // hashes can't cycle), to exercise the depth cap itself.
        let mut csum = store
            .write_metadata(ObjectType::DirTree, &DirTree::default().encode())
            .unwrap();
        let meta_csum = store
            .write_metadata(ObjectType::DirMeta, &DirMeta::default().encode())
            .unwrap();
        for _ in 0..(MAX_RECURSION_DEPTH + 10) {
            let tree = DirTree::from_entries(vec![], vec![("d".into(), csum, meta_csum)]).unwrap();
            csum = store.write_metadata(ObjectType::DirTree, &tree.encode()).unwrap();
        }
        let commit_csum = write_commit(&store, csum, meta_csum);
        let err = traverse_commit(&store, &commit_csum).unwrap_err();
        assert!(matches!(err, Error::RecursionExceeded { .. }));
    }
}
