//! Shared helpers for scenario-level integration tests: temp repos seeded
//! with commits built the same way every test needs them, so the `tests/`
//! suite isn't full of copy-pasted object-graph construction.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rootimage::Checksum;
use rootimage::Config;
use rootimage::ObjectType;
use rootimage::RepoMode;
use rootimage::Repo;
use rootimage::objects::Commit;
use rootimage::objects::DirMeta;
use rootimage::objects::DirTree;
use rootimage::objects::FileHeader;
use rootimage::objects::MetadataMap;
use tempfile::TempDir;

/// A fresh temp directory, parallel to every other module's unit tests.
pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("rootimage-test-")
        .tempdir()
        .unwrap()
}

/// Opens a [`TempDir`] as a [`Utf8Path`]; panics if the platform's temp dir
/// somehow isn't UTF-8, which none of our CI targets are.
pub fn temp_path(dir: &TempDir) -> &Utf8Path {
    Utf8Path::from_path(dir.path()).unwrap()
}

/// Creates a repository at a fresh temp directory with fsync disabled
/// (tests don't need durability, only correctness) and returns both the
/// directory (kept alive by the caller) and the open handle.
pub fn empty_repo(mode: RepoMode) -> (TempDir, Repo) {
    let dir = new_temp_dir();
    let repo = Repo::create(temp_path(&dir), mode).unwrap().with_fsync_disabled().unwrap();
    (dir, repo)
}

/// A single-file tree's contents, as built by [`commit_single_file`].
pub struct SingleFileCommit {
    pub commit: Checksum,
    pub file: Checksum,
    pub dirtree: Checksum,
    pub dirmeta: Checksum,
}

/// Writes a commit whose root tree holds exactly one file named `name`,
/// returning every object checksum along the way so a test can assert on
/// the object count without re-deriving it (spec.md §8 scenarios 1-2).
pub fn commit_single_file(
    repo: &Repo,
    parent: Option<Checksum>,
    name: &str,
    content: &[u8],
    mode: u32,
    subject: &str,
    timestamp: i64,
) -> SingleFileCommit {
    let store = repo.store();
    let header = FileHeader {
        size: content.len() as u64,
        uid: 0,
        gid: 0,
        mode,
        rdev: 0,
        symlink_target: None,
        xattrs: vec![],
    };
    let file = store.write_file(&header, content).unwrap();
    let dirmeta = DirMeta {
        uid: 0,
        gid: 0,
        mode: 0o40755,
        xattrs: vec![],
    };
    let dirmeta = store.write_metadata(ObjectType::DirMeta, &dirmeta.encode()).unwrap();
    let dirtree = DirTree::from_entries(vec![(name.to_owned(), file)], vec![]).unwrap();
    let dirtree = store.write_metadata(ObjectType::DirTree, &dirtree.encode()).unwrap();
    let commit = Commit {
        metadata: MetadataMap::new(),
        parent,
        related_objects: vec![],
        subject: subject.to_owned(),
        body: String::new(),
        timestamp,
        root_dirtree: dirtree,
        root_dirmeta: dirmeta,
    };
    let commit = store.write_metadata(ObjectType::Commit, &commit.encode()).unwrap();
    SingleFileCommit {
        commit,
        file,
        dirtree,
        dirmeta,
    }
}

/// Writes a commit with an empty root tree (spec.md §8 scenario 1).
pub fn commit_empty_tree(repo: &Repo, parent: Option<Checksum>, subject: &str, timestamp: i64) -> Checksum {
    let store = repo.store();
    let dirmeta = DirMeta {
        uid: 0,
        gid: 0,
        mode: 0o40755,
        xattrs: vec![],
    };
    let dirmeta = store.write_metadata(ObjectType::DirMeta, &dirmeta.encode()).unwrap();
    let dirtree = DirTree::from_entries(vec![], vec![]).unwrap();
    let dirtree = store.write_metadata(ObjectType::DirTree, &dirtree.encode()).unwrap();
    let commit = Commit {
        metadata: MetadataMap::new(),
        parent,
        related_objects: vec![],
        subject: subject.to_owned(),
        body: String::new(),
        timestamp,
        root_dirtree: dirtree,
        root_dirmeta: dirmeta,
    };
    store.write_metadata(ObjectType::Commit, &commit.encode()).unwrap()
}

/// Writes a minimal `config` file declaring `mode` plus a single
/// `[remote "origin"]` pointing at `url`, the shape the pull engine's
/// Phase 1 expects to fetch from a real remote.
pub fn write_origin_config(root: &Utf8Path, mode: RepoMode, url: &str, gpg_verify: bool) {
    let contents = format!(
        "[core]\nrepo_version=1\nmode={}\n\n[remote \"origin\"]\nurl={url}\ngpg-verify={gpg_verify}\n",
        mode.as_str(),
    );
    std::fs::write(root.join("config"), contents).unwrap();
}

/// Parses a `config` file without opening a full repo, used by tests that
/// only need to assert on what a generator or CLI command wrote.
pub fn load_config(root: &Utf8Path) -> Config {
    Config::load(&root.join("config")).unwrap()
}

/// Joins `root`'s `objects` directory, for tests that assert on loose
/// object counts directly against the filesystem.
pub fn objects_dir(root: &Utf8Path) -> Utf8PathBuf {
    root.join("objects")
}
