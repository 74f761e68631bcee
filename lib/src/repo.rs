//! The repository handle: config, mode, parent-repo chain, directory
//! skeleton, and the transaction lifecycle that brackets batches of writes.

use std::collections::BTreeMap;
use std::fs::File;
use std::fs::OpenOptions;

use camino::Utf8Path;
use camino::Utf8PathBuf;

use crate::checksum::Checksum;
use crate::config::Config;
use crate::config::RepoMode;
use crate::error::Error;
use crate::error::Result;
use crate::refs::RefName;
use crate::refs::local_ref_path;
use crate::refs::remote_ref_path;
use crate::store::LooseObjectStore;

/// An open repository. Holds everything a caller needs: the parsed config,
/// the loose-object store (itself carrying the parent-repo chain), and the
/// repo root for ref/tmp/delta paths. All repository state lives behind
/// this handle — there is no process-wide global.
pub struct Repo {
    root: Utf8PathBuf,
    config: Config,
    store: LooseObjectStore,
    disable_fsync: bool,
}

const SKELETON_DIRS: &[&str] = &[
    "objects",
    "tmp",
    "refs/heads",
    "refs/remotes",
    "remote-cache",
    "deltas",
];

impl Repo {
    /// Opens an existing repository at `root`, validating
    /// `core.repo_version == 1` and the configured mode.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&root.join("config"))?;
        Self::open_with_config(root, config, false)
    }

    fn open_with_config(root: Utf8PathBuf, config: Config, disable_fsync: bool) -> Result<Self> {
        let parent_store = match &config.parent {
            Some(parent_path) => {
                let parent_root = Utf8PathBuf::from(parent_path);
                let parent_config = Config::load(&parent_root.join("config"))?;
                Some(LooseObjectStore::new(
                    &parent_root,
                    parent_config.mode,
                    true,
                    None,
                ))
            }
            None => None,
        };
        let store = LooseObjectStore::new(&root, config.mode, disable_fsync, parent_store);
        Ok(Self {
            root,
            config,
            store,
            disable_fsync,
        })
    }

    /// Creates a fresh repository: the directory skeleton plus a minimal
    /// `config` declaring `mode`.
    pub fn create(root: impl Into<Utf8PathBuf>, mode: RepoMode) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        for rel in SKELETON_DIRS {
            let dir = root.join(rel);
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        if mode == RepoMode::ArchiveZ2 {
            let dir = root.join("uncompressed-objects-cache");
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        let config_path = root.join("config");
        std::fs::write(&config_path, Config::default_contents(mode))
            .map_err(|e| Error::io(&config_path, e))?;
        Self::open(root)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn mode(&self) -> RepoMode {
        self.config.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LooseObjectStore {
        &self.store
    }

    pub fn disable_fsync(&self) -> bool {
        self.disable_fsync
    }

    /// Returns a repo handle identical to this one but with fsync disabled,
    /// used by callers (tests, bulk imports) that accept the durability
    /// trade-off for speed.
    pub fn with_fsync_disabled(self) -> Result<Self> {
        Self::open_with_config(self.root, self.config, true)
    }

    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.root.join("tmp")
    }

    pub fn refs_dir(&self) -> Utf8PathBuf {
        self.root.join("refs")
    }

    pub fn deltas_dir(&self) -> Utf8PathBuf {
        self.root.join("deltas")
    }

    pub fn remote_cache_dir(&self, remote: &str) -> Utf8PathBuf {
        self.root.join("remote-cache").join(remote)
    }

    pub fn local_ref_path(&self, name: &RefName) -> Utf8PathBuf {
        local_ref_path(&self.refs_dir(), name)
    }

    pub fn remote_ref_path(&self, remote: &str, name: &RefName) -> Utf8PathBuf {
        remote_ref_path(&self.refs_dir(), remote, name)
    }

    pub fn resolve_local_ref(&self, name: &RefName) -> Result<Checksum> {
        crate::refs::read_ref(&self.local_ref_path(name), name.as_str())
    }

    pub fn try_resolve_remote_ref(&self, remote: &str, name: &RefName) -> Result<Option<Checksum>> {
        crate::refs::try_read_ref(&self.remote_ref_path(remote, name))
    }

    /// Acquires the transaction lock and begins a transaction. Returns a
    /// [`Transaction`] whose `Drop` aborts (releasing the lock without
    /// committing) unless [`Transaction::commit`] was called — there is no
    /// global rollback, only a lock released on abort.
    pub fn prepare_transaction(&self) -> Result<Transaction<'_>> {
        let lock_path = self.tmp_dir().join(".lock");
        std::fs::create_dir_all(self.tmp_dir()).map_err(|e| Error::io(self.tmp_dir(), e))?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::io(&lock_path, e))?;
        lock_exclusive(&lock_file, &lock_path)?;

        // A marker left behind by a transaction that never reached commit()
        // or abort() (the process died, or was killed, while it held the
        // lock) means we're resuming one: the pull engine uses this to
        // re-scan objects that are already stored so recursion can pick up
        // where it left off, rather than needing a wrong-but-safe proxy like
        // "the object store happens to be non-empty".
        let marker_path = self.in_progress_marker_path();
        let resuming = marker_path.exists();
        std::fs::write(&marker_path, b"").map_err(|e| Error::io(&marker_path, e))?;

        Ok(Transaction {
            repo: self,
            lock_file,
            marker_path,
            resuming,
            txn_refs: BTreeMap::new(),
            done: false,
        })
    }

    fn in_progress_marker_path(&self) -> Utf8PathBuf {
        self.tmp_dir().join(".txn-in-progress")
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Utf8Path) -> Result<()> {
    use rustix::fs::FlockOperation;
    rustix::fs::flock(file, FlockOperation::LockExclusive).map_err(|e| {
        if e == rustix::io::Errno::WOULDBLOCK || e == rustix::io::Errno::AGAIN {
            Error::TransactionConflict
        } else {
            Error::io(path, std::io::Error::from(e))
        }
    })
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Utf8Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    use rustix::fs::FlockOperation;
    let _ = rustix::fs::flock(file, FlockOperation::Unlock);
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

/// A scoped batch of writes bracketed by an exclusive lock on
/// `tmp/.lock`. Object writes go straight to the store as they happen;
/// only ref updates are staged here and published atomically by
/// [`Transaction::commit`].
pub struct Transaction<'repo> {
    repo: &'repo Repo,
    lock_file: File,
    marker_path: Utf8PathBuf,
    resuming: bool,
    txn_refs: BTreeMap<String, Checksum>,
    done: bool,
}

impl Transaction<'_> {
    /// Whether this transaction found leftover state from a prior,
    /// interrupted run. The pull engine uses this to promote already-stored
    /// objects to "scanned" so the traversal resumes rather than refetching.
    pub fn resuming(&self) -> bool {
        self.resuming
    }

    /// Stages a ref update. Not visible to readers until [`Self::commit`].
    pub fn stage_ref(&mut self, ref_key: String, checksum: Checksum) {
        self.txn_refs.insert(ref_key, checksum);
    }

    pub fn staged_refs(&self) -> &BTreeMap<String, Checksum> {
        &self.txn_refs
    }

    /// Publishes every staged ref by atomic rename, then releases the lock.
    /// This is the transaction's single publication step: no ref becomes
    /// visible to a concurrent reader before every staged ref is written.
    pub fn commit(mut self, ref_path: impl Fn(&str) -> Utf8PathBuf) -> Result<()> {
        for (key, checksum) in &self.txn_refs {
            crate::refs::write_ref(&ref_path(key), checksum)?;
        }
        self.done = true;
        let _ = std::fs::remove_file(&self.marker_path);
        unlock(&self.lock_file);
        Ok(())
    }

    /// Discards staged ref updates and releases the lock without publishing
    /// anything. Objects already written to the store are left in place;
    /// they are orphaned garbage recoverable by a prune pass, not rolled
    /// back.
    pub fn abort(mut self) {
        self.txn_refs.clear();
        self.done = true;
        let _ = std::fs::remove_file(&self.marker_path);
        unlock(&self.lock_file);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            unlock(&self.lock_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_open_round_trips_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::ArchiveZ2).unwrap();
        assert_eq!(repo.mode(), RepoMode::ArchiveZ2);
        assert!(path.join("objects").is_dir());
        assert!(path.join("uncompressed-objects-cache").is_dir());

        let reopened = Repo::open(path).unwrap();
        assert_eq!(reopened.mode(), RepoMode::ArchiveZ2);
    }

    #[test]
    fn open_rejects_legacy_archive_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(path.join("config"), "[core]\nrepo_version=1\nmode=archive\n").unwrap();
        let err = Repo::open(path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn transaction_commit_publishes_staged_refs() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap();

        let name = RefName::new("master").unwrap();
        let checksum = Checksum::of(b"commit");
        let mut txn = repo.prepare_transaction().unwrap();
        assert!(!txn.resuming());
        txn.stage_ref(name.as_str().to_owned(), checksum);
        txn.commit(|key| repo.local_ref_path(&RefName::new(key).unwrap()))
            .unwrap();

        assert_eq!(repo.resolve_local_ref(&name).unwrap(), checksum);
    }

    #[test]
    fn transaction_abort_does_not_publish_refs() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap();

        let name = RefName::new("master").unwrap();
        let mut txn = repo.prepare_transaction().unwrap();
        txn.stage_ref(name.as_str().to_owned(), Checksum::of(b"commit"));
        txn.abort();

        assert!(repo.resolve_local_ref(&name).is_err());
    }

    #[test]
    fn second_transaction_after_commit_is_not_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap();

        let txn = repo.prepare_transaction().unwrap();
        txn.commit(|key| repo.local_ref_path(&RefName::new(key).unwrap()))
            .unwrap();

        let txn2 = repo.prepare_transaction().unwrap();
        assert!(!txn2.resuming());
        txn2.abort();
    }

    #[test]
    fn non_empty_store_alone_does_not_imply_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap();

        let txn = repo.prepare_transaction().unwrap();
        txn.commit(|key| repo.local_ref_path(&RefName::new(key).unwrap()))
            .unwrap();
        repo.store()
            .write_metadata(
                crate::objects::ObjectType::DirTree,
                &crate::objects::DirTree::default().encode(),
            )
            .unwrap();

        // The store now holds an object from a transaction that completed
        // cleanly; a later transaction must not mistake that for leftover
        // state from an interrupted one.
        let txn2 = repo.prepare_transaction().unwrap();
        assert!(!txn2.resuming());
        txn2.abort();
    }

    #[test]
    fn transaction_dropped_without_commit_or_abort_leaves_the_next_one_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let repo = Repo::create(path, RepoMode::Bare).unwrap();

        let txn = repo.prepare_transaction().unwrap();
        drop(txn);

        let txn2 = repo.prepare_transaction().unwrap();
        assert!(txn2.resuming());
        txn2.abort();

        let txn3 = repo.prepare_transaction().unwrap();
        assert!(!txn3.resuming());
        txn3.abort();
    }
}
