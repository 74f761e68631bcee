//! The pull engine's event loop: resolves requested refs against a remote,
//! then drives a single `tokio` task that owns [`PullState`] exclusively,
//! fed by completions delivered over one `mpsc` channel — callbacks become
//! tasks plus channel messages, a restatement of a single-threaded
//! cooperative scheduler.
//!
//! Network fetches are genuinely concurrent `tokio::spawn` tasks; every
//! object write happens synchronously, inline, on the loop task itself.
//! This mirrors the source design more closely than it might look: only
//! the HTTP fetch is an async boundary there too, object writes are plain
//! blocking calls invoked from the same callback that received the fetch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checksum::Checksum;
use crate::config::RepoMode;
use crate::delta::apply::apply_part;
use crate::delta::format::PartHeader;
use crate::delta::format::Superblock;
use crate::error::Error;
use crate::error::Result;
use crate::error::WithPhase as _;
use crate::fetch::Fetcher;
use crate::gpg::DetachedMetadata;
use crate::gpg::GpgBackend;
use crate::gpg::verify_any;
use crate::objects::Commit;
use crate::objects::DirTree;
use crate::objects::ObjectType;
use crate::pull::progress::ProgressSink;
use crate::pull::state::Phase;
use crate::pull::state::PullState;
use crate::refs::RefName;
use crate::repo::Repo;
use crate::store::LooseObjectStore;
use crate::store::decode_archive_content;
use crate::traverse::MAX_RECURSION_DEPTH;

/// Per-call pull parameters.
pub struct PullRequest<'a> {
    pub remote: &'a str,
    /// Either a branch name (resolved through `refs/heads/<ref>`) or a bare
    /// 64-hex commit checksum.
    pub refs: &'a [String],
    pub gpg_backend: Option<&'a dyn GpgBackend>,
}

/// Summary returned once the pull loop drains cleanly.
#[derive(Debug, Default, Clone)]
pub struct PullReport {
    pub updated_refs: BTreeMap<String, Checksum>,
    pub bytes_transferred: u64,
    pub objects_fetched: u64,
}

/// Completions delivered back to the loop task. Each carries enough of the
/// request's identity to update `PullState` and, on success, the fetched
/// bytes (already read back from the tmp file the fetch wrote into).
enum PullEvent {
    MetadataFetched {
        csum: Checksum,
        kind: ObjectType,
        is_detached_meta: bool,
        result: Result<Vec<u8>>,
    },
    ContentFetched {
        csum: Checksum,
        result: Result<Vec<u8>>,
    },
    DeltaPartFetched {
        to: Checksum,
        index: usize,
        result: Result<Vec<u8>>,
    },
}

/// Shared, cheaply-cloned context every `enqueue_*` helper closes over when
/// it spawns a fetch task. Everything captured by a spawned task is owned
/// (`Arc`, `String`, `Utf8PathBuf`), so the tasks are `'static` even though
/// `PullContext` itself borrows the GPG backend for the lifetime of the
/// pull call.
struct PullContext<'a> {
    fetcher: Arc<dyn Fetcher>,
    tmp_dir: Utf8PathBuf,
    sender: mpsc::UnboundedSender<PullEvent>,
    gpg_backend: Option<&'a dyn GpgBackend>,
    gpg_required: bool,
}

impl PullContext<'_> {
    fn object_uri(&self, kind: ObjectType, csum: &Checksum, is_detached_meta: bool) -> String {
        let hex = csum.hex();
        let (prefix, rest) = hex.split_at(2);
        if is_detached_meta {
            format!("objects/{prefix}/{rest}.commitmeta")
        } else {
            format!("objects/{prefix}/{rest}.{}", kind.ext_archive())
        }
    }

    /// Reserves a uniquely-named file under `tmp/` for an in-flight fetch,
    /// without pulling in a `rand` dependency: `tempfile::NamedTempFile`
    /// already guarantees a unique name, we just keep it around past the
    /// guard's `Drop`.
    fn reserve_tmp_path(&self) -> Result<Utf8PathBuf> {
        std::fs::create_dir_all(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        let named = tempfile::NamedTempFile::new_in(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        let std_path = named.into_temp_path().keep().map_err(|e| Error::io(&self.tmp_dir, e.error))?;
        Utf8PathBuf::try_from(std_path).map_err(|e| Error::invalid_format(format!("tmp path is not valid UTF-8: {e}")))
    }

    fn enqueue_metadata_fetch(&self, csum: Checksum, kind: ObjectType, is_detached_meta: bool, state: &mut PullState) {
        let dest = match self.reserve_tmp_path() {
            Ok(dest) => dest,
            Err(e) => {
                state.set_error_once(format!("fetching {kind} object {csum}"), e);
                return;
            }
        };
        state.counters.metadata_fetches_outstanding += 1;
        let uri = self.object_uri(kind, &csum, is_detached_meta);
        let fetcher = Arc::clone(&self.fetcher);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = fetch_to_memory(&fetcher, &uri, &dest).await;
            let _ = sender.send(PullEvent::MetadataFetched {
                csum,
                kind,
                is_detached_meta,
                result,
            });
        });
    }

    fn enqueue_content_fetch(&self, csum: Checksum, state: &mut PullState) {
        let dest = match self.reserve_tmp_path() {
            Ok(dest) => dest,
            Err(e) => {
                state.set_error_once(format!("fetching file content {csum}"), e);
                return;
            }
        };
        state.counters.content_fetches_outstanding += 1;
        let uri = self.object_uri(ObjectType::File, &csum, false);
        let fetcher = Arc::clone(&self.fetcher);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = fetch_to_memory(&fetcher, &uri, &dest).await;
            let _ = sender.send(PullEvent::ContentFetched { csum, result });
        });
    }

    fn enqueue_delta_part_fetch(&self, to: Checksum, from_hex: String, to_hex: String, index: usize, state: &mut PullState) {
        let dest = match self.reserve_tmp_path() {
            Ok(dest) => dest,
            Err(e) => {
                state.set_error_once(format!("fetching delta part {index} for {to}"), e);
                return;
            }
        };
        state.counters.delta_part_fetches_outstanding += 1;
        let uri = format!("deltas/{from_hex}/{to_hex}/{index}");
        let fetcher = Arc::clone(&self.fetcher);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = fetch_to_memory(&fetcher, &uri, &dest).await;
            let _ = sender.send(PullEvent::DeltaPartFetched { to, index, result });
        });
    }
}

async fn fetch_to_memory(fetcher: &Arc<dyn Fetcher>, uri: &str, dest: &Utf8Path) -> Result<Vec<u8>> {
    fetcher.request_uri_with_partial(uri, dest).await?;
    let bytes = tokio::fs::read(dest).await.map_err(|e| Error::io(dest, e));
    let _ = tokio::fs::remove_file(dest).await;
    bytes
}

/// Resolves and fetches everything needed for `remote`'s `request.refs` to
/// resolve locally to complete, closed commits (invariant I2), then stages
/// and commits the updated remote-tracking refs.
pub async fn pull(
    repo: &Repo,
    fetcher: Arc<dyn Fetcher>,
    request: PullRequest<'_>,
    progress: &dyn ProgressSink,
    cancel: CancellationToken,
) -> Result<PullReport> {
    let remote_config = repo.config().remote(request.remote)?.clone();

    let mut txn = repo.prepare_transaction()?;
    let store = repo.store();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let ctx = PullContext {
        fetcher,
        tmp_dir: repo.tmp_dir(),
        sender,
        gpg_backend: request.gpg_backend,
        gpg_required: remote_config.gpg_verify,
    };

    let mut state = PullState::new(txn.resuming());

    // Phase 1: resolve the requested refs against the remote.
    let to_revisions = resolve_requested_refs(&ctx, request.refs).await.with_phase(|| "resolving requested refs".to_owned())?;

    state.phase = Phase::FetchingObjects;

    // Phase 2: objects, one revision at a time.
    let mut delta_parts: BTreeMap<(Checksum, usize), PartHeader> = BTreeMap::new();
    for (ref_name, to_revision) in &to_revisions {
        resolve_ref_phase2(
            &ctx,
            repo,
            request.remote,
            &mut state,
            &mut delta_parts,
            ref_name.as_ref(),
            *to_revision,
        )
        .await
        .with_phase(|| format!("resolving revision {to_revision}"))?;
    }

    drive_loop(&mut receiver, &ctx, repo, &mut state, &mut delta_parts, progress, &cancel).await;

    if let Some(err) = state.error {
        progress.finish("pull failed");
        let phase = state.error_phase.unwrap_or_else(|| "fetching objects".to_owned());
        return Err(Error::Phase {
            phase,
            source: Box::new(err),
        });
    }

    let mut updated_refs = BTreeMap::new();
    for (ref_name, to_revision) in &to_revisions {
        let Some(ref_name) = ref_name else { continue };
        let current = repo
            .try_resolve_remote_ref(request.remote, ref_name)
            .with_phase(|| format!("staging updated ref '{}'", ref_name.as_str()))?;
        if current != Some(*to_revision) {
            let key = format!("remotes/{}/{}", request.remote, ref_name.as_str());
            txn.stage_ref(key, *to_revision);
            updated_refs.insert(ref_name.as_str().to_owned(), *to_revision);
        }
    }
    txn.commit(|key| repo.refs_dir().join(key))
        .with_phase(|| "committing updated refs".to_owned())?;
    progress.finish("pull complete");

    Ok(PullReport {
        updated_refs,
        bytes_transferred: ctx.fetcher.bytes_transferred(),
        objects_fetched: state.counters.content_writes_completed + state.counters.metadata_writes_completed,
    })
}

/// Resolves every requested ref/checksum argument against the remote's
/// published config and `refs/heads/`, returning each one's target commit
/// paired with the local ref name it should update (`None` for a bare
/// checksum, which has no name to stage).
async fn resolve_requested_refs(
    ctx: &PullContext<'_>,
    refs: &[String],
) -> Result<Vec<(Option<RefName>, Checksum)>> {
    let remote_config_bytes = ctx.fetcher.stream_uri("config").await?;
    let remote_config_text = String::from_utf8(remote_config_bytes)
        .map_err(|e| Error::invalid_format(format!("remote config is not UTF-8: {e}")))?;
    let remote_repo_config = crate::config::Config::parse(&remote_config_text)?;
    if remote_repo_config.mode != RepoMode::ArchiveZ2 {
        return Err(Error::InvalidConfig(
            "remote repository must be in archive-z2 mode".into(),
        ));
    }

    let mut to_revisions: Vec<(Option<RefName>, Checksum)> = Vec::with_capacity(refs.len());
    for ref_arg in refs {
        if Checksum::looks_like_hex(ref_arg) {
            to_revisions.push((None, Checksum::from_hex(ref_arg)?));
            continue;
        }
        let ref_name = RefName::new(ref_arg.clone())?;
        let bytes = ctx.fetcher.stream_uri(&format!("refs/heads/{ref_arg}")).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::invalid_format(format!("ref value is not UTF-8: {e}")))?;
        let checksum = Checksum::from_hex(text.trim())?;
        to_revisions.push((Some(ref_name), checksum));
    }
    Ok(to_revisions)
}

/// Implements Phase 2 steps 1-3 for a single requested ref:
/// resolve the locally-known `from_revision`, try the static-delta path,
/// and fall back to `scan_metadata_object` (object-by-object) either when
/// there is no `from_revision` or the remote has no delta for this pair.
async fn resolve_ref_phase2(
    ctx: &PullContext<'_>,
    repo: &Repo,
    remote: &str,
    state: &mut PullState,
    delta_parts: &mut BTreeMap<(Checksum, usize), PartHeader>,
    ref_name: Option<&RefName>,
    to_revision: Checksum,
) -> Result<()> {
    let store = repo.store();
    let from_revision = match ref_name {
        Some(name) => repo.try_resolve_remote_ref(remote, name)?,
        None => None,
    };

    if let Some(from_revision) = from_revision {
        let from_hex = from_revision.hex();
        let to_hex = to_revision.hex();
        let meta_uri = format!("deltas/{from_hex}/{to_hex}/meta");
        match ctx.fetcher.stream_uri(&meta_uri).await {
            Ok(meta_bytes) => {
                if ctx.gpg_required {
                    if let Some(backend) = ctx.gpg_backend {
                        let commitmeta_uri = format!("deltas/{from_hex}/{to_hex}/.commitmeta");
                        let detached = match ctx.fetcher.stream_uri(&commitmeta_uri).await {
                            Ok(bytes) => DetachedMetadata::decode(&bytes)?,
                            Err(e) if e.is_not_found() => DetachedMetadata::new(),
                            Err(e) => return Err(e),
                        };
                        verify_any(backend, &meta_bytes, &detached)?;
                    }
                }

                let superblock = Superblock::decode(&meta_bytes)?;
                let cache_dir = repo
                    .remote_cache_dir(remote)
                    .join("deltas")
                    .join(&from_hex)
                    .join(&to_hex);
                std::fs::create_dir_all(&cache_dir).map_err(|e| Error::io(&cache_dir, e))?;
                std::fs::write(cache_dir.join("meta"), &meta_bytes).map_err(|e| Error::io(&cache_dir, e))?;

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
                    delta_parts.insert((superblock.to, index), header.clone());
                    ctx.enqueue_delta_part_fetch(superblock.to, from_hex.clone(), to_hex.clone(), index, state);
                }

                for fallback in &superblock.fallbacks {
                    if store.has_object(fallback.kind, &fallback.checksum)? {
                        continue;
                    }
                    match fallback.kind {
                        ObjectType::File => {
                            if state.requested_content.insert(fallback.checksum) {
                                ctx.enqueue_content_fetch(fallback.checksum, state);
                            }
                        }
                        _ => {
                            if state.requested_metadata.insert(fallback.checksum) {
                                ctx.enqueue_metadata_fetch(fallback.checksum, fallback.kind, false, state);
                            }
                        }
                    }
                }
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                // No delta for this transition; fall through to scanning.
            }
            Err(e) => return Err(e),
        }
    }

    scan_metadata_object(ctx, store, state, to_revision, ObjectType::Commit, 0);
    Ok(())
}

/// The at-most-once scheduling core: walks a metadata object's references,
/// enqueueing a fetch for anything missing locally. Recurses only into
/// objects that are either freshly stored by this pull or already known
/// from a resumed, interrupted transaction.
fn scan_metadata_object(
    ctx: &PullContext<'_>,
    store: &LooseObjectStore,
    state: &mut PullState,
    csum: Checksum,
    kind: ObjectType,
    depth: u32,
) {
    if depth > MAX_RECURSION_DEPTH {
        state.set_error_once(
            format!("scanning {kind} object {csum}"),
            Error::RecursionExceeded {
                limit: MAX_RECURSION_DEPTH,
            },
        );
        return;
    }
    if state.scanned_metadata.contains(&(csum, kind)) {
        return;
    }

    let stored = match store.has_object(kind, &csum) {
        Ok(stored) => stored,
        Err(e) => {
            state.set_error_once(format!("checking whether {kind} object {csum} is already stored"), e);
            return;
        }
    };

    if !stored {
        if state.requested_metadata.insert(csum) {
            ctx.enqueue_metadata_fetch(csum, kind, kind == ObjectType::Commit, state);
        }
        return;
    }

    let just_requested = state.requested_metadata.contains(&csum);
    if state.resuming || just_requested {
        match kind {
            ObjectType::Commit => {
                let bytes = match store.load_object(ObjectType::Commit, &csum) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        state.set_error_once(format!("loading commit {csum}"), e);
                        return;
                    }
                };
                let commit = match Commit::decode(&bytes) {
                    Ok(commit) => commit,
                    Err(e) => {
                        state.set_error_once(format!("decoding commit {csum}"), e);
                        return;
                    }
                };
                scan_metadata_object(ctx, store, state, commit.root_dirtree, ObjectType::DirTree, depth + 1);
                state.scanned_metadata.insert((commit.root_dirmeta, ObjectType::DirMeta));
            }
            ObjectType::DirTree => {
                let bytes = match store.load_object(ObjectType::DirTree, &csum) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        state.set_error_once(format!("loading dirtree {csum}"), e);
                        return;
                    }
                };
                let tree = match DirTree::decode(&bytes) {
                    Ok(tree) => tree,
                    Err(e) => {
                        state.set_error_once(format!("decoding dirtree {csum}"), e);
                        return;
                    }
                };
                for (_, file_csum) in &tree.files {
                    let has = match store.has_object(ObjectType::File, file_csum) {
                        Ok(has) => has,
                        Err(e) => {
                            state.set_error_once(format!("checking whether file {file_csum} is already stored"), e);
                            return;
                        }
                    };
                    if !has && state.requested_content.insert(*file_csum) {
                        ctx.enqueue_content_fetch(*file_csum, state);
                    }
                }
                for (_, subtree, submeta) in &tree.dirs {
                    scan_metadata_object(ctx, store, state, *subtree, ObjectType::DirTree, depth + 1);
                    state.scanned_metadata.insert((*submeta, ObjectType::DirMeta));
                }
            }
            ObjectType::DirMeta | ObjectType::File => {}
        }
    }
    state.scanned_metadata.insert((csum, kind));
}

/// Drains completions until [`PullState::is_idle`] or an error is recorded,
/// ticking `progress` once a second.
async fn drive_loop(
    receiver: &mut mpsc::UnboundedReceiver<PullEvent>,
    ctx: &PullContext<'_>,
    repo: &Repo,
    state: &mut PullState,
    delta_parts: &mut BTreeMap<(Checksum, usize), PartHeader>,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) {
    if state.is_idle() {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                state.set_error_once("waiting for the pull to finish", Error::Cancelled);
            }
            _ = ticker.tick() => {
                progress.update(state, ctx.fetcher.bytes_transferred());
            }
            maybe_event = receiver.recv() => {
                match maybe_event {
                    Some(event) => handle_event(ctx, repo, state, delta_parts, event),
                    None => break,
                }
            }
        }
        if state.is_idle() || state.error.is_some() {
            break;
        }
    }
}

fn handle_event(
    ctx: &PullContext<'_>,
    repo: &Repo,
    state: &mut PullState,
    delta_parts: &mut BTreeMap<(Checksum, usize), PartHeader>,
    event: PullEvent,
) {
    let store = repo.store();
    match event {
        PullEvent::MetadataFetched {
            csum,
            kind,
            is_detached_meta,
            result,
        } => {
            state.counters.metadata_fetches_outstanding -= 1;
            state.counters.metadata_fetches_completed += 1;
            match result {
                Err(e) if is_detached_meta && e.is_not_found() => {
                    // No detached metadata published; proceed to fetch the
                    // bare commit.
                    ctx.enqueue_metadata_fetch(csum, kind, false, state);
                }
                Err(e) => state.set_error_once(format!("fetching {kind} object {csum}"), e),
                Ok(bytes) if is_detached_meta => {
                    if let Err(e) = store.write_detached_metadata(&csum, &bytes) {
                        state.set_error_once(format!("writing detached metadata for {csum}"), e);
                    } else {
                        ctx.enqueue_metadata_fetch(csum, kind, false, state);
                    }
                }
                Ok(bytes) => match store.write_metadata(kind, &bytes) {
                    Ok(actual) if actual == csum => {
                        state.counters.metadata_writes_completed += 1;
                        if kind == ObjectType::Commit && !verify_commit_signature(ctx, store, &csum, &bytes, state) {
                            return;
                        }
                        scan_metadata_object(ctx, store, state, csum, kind, 0);
                    }
                    Ok(actual) => state.set_error_once(
                        format!("validating {kind} object {csum}"),
                        Error::ChecksumMismatch {
                            object_type: kind,
                            expected: csum,
                            actual,
                        },
                    ),
                    Err(e) => state.set_error_once(format!("writing {kind} object {csum}"), e),
                },
            }
        }
        PullEvent::ContentFetched { csum, result } => {
            state.counters.content_fetches_outstanding -= 1;
            state.counters.content_fetches_completed += 1;
            match result {
                Err(e) => state.set_error_once(format!("fetching file content {csum}"), e),
                Ok(bytes) => match decode_archive_content(&bytes) {
                    Ok((header, content)) => match store.write_file(&header, &content) {
                        Ok(actual) if actual == csum => state.counters.content_writes_completed += 1,
                        Ok(actual) => state.set_error_once(
                            format!("validating file object {csum}"),
                            Error::ChecksumMismatch {
                                object_type: ObjectType::File,
                                expected: csum,
                                actual,
                            },
                        ),
                        Err(e) => state.set_error_once(format!("writing file object {csum}"), e),
                    },
                    Err(e) => state.set_error_once(format!("decoding file content {csum}"), e),
                },
            }
        }
        PullEvent::DeltaPartFetched { to, index, result } => {
            state.counters.delta_part_fetches_outstanding -= 1;
            state.counters.delta_part_fetches_completed += 1;
            match result {
                Err(e) => state.set_error_once(format!("fetching delta part {index} for {to}"), e),
                Ok(bytes) => match delta_parts.get(&(to, index)) {
                    Some(header) => match apply_part(store, header, &bytes, false) {
                        Ok(()) => state.counters.delta_part_writes_completed += 1,
                        Err(e) => state.set_error_once(format!("applying delta part {index} for {to}"), e),
                    },
                    None => state.set_error_once(
                        format!("applying delta part {index} for {to}"),
                        Error::invalid_format("delta part fetched with no matching header"),
                    ),
                },
            }
        }
    }
}

/// Checks a just-written commit's detached signature set, if GPG
/// verification is required. Returns `false` (having already recorded the
/// error) when verification fails, so the caller can skip recursing into
/// an untrusted commit's tree.
fn verify_commit_signature(ctx: &PullContext<'_>, store: &LooseObjectStore, csum: &Checksum, commit_bytes: &[u8], state: &mut PullState) -> bool {
    let Some(backend) = ctx.gpg_backend.filter(|_| ctx.gpg_required) else {
        return true;
    };
    let detached_bytes = match store.load_detached_metadata(csum) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            state.set_error_once(format!("verifying signatures for commit {csum}"), Error::MissingSignatures);
            return false;
        }
        Err(e) => {
            state.set_error_once(format!("loading detached metadata for commit {csum}"), e);
            return false;
        }
    };
    let detached = match DetachedMetadata::decode(&detached_bytes) {
        Ok(detached) => detached,
        Err(e) => {
            state.set_error_once(format!("decoding detached metadata for commit {csum}"), e);
            return false;
        }
    };
    if let Err(e) = verify_any(backend, commit_bytes, &detached) {
        state.set_error_once(format!("verifying signature for commit {csum}"), e);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::RepoMode;
    use crate::delta::generate::GenerateOptions;
    use crate::delta::generate::generate;
    use crate::fetch::LocalDirFetcher;
    use crate::gpg::Signature;
    use crate::objects::DirMeta;
    use crate::objects::FileHeader;
    use crate::objects::MetadataMap;
    use crate::pull::progress::NullProgressSink;
    use crate::traverse::traverse_commit;

    struct FakeGpgBackend {
        trusted: Vec<Signature>,
    }

    impl GpgBackend for FakeGpgBackend {
        fn sign(&self, data: &[u8], key_id: &str, _homedir: Option<&str>) -> Result<Signature> {
            Ok(format!("sig:{key_id}:{}", data.len()).into_bytes())
        }

        fn verify_one(&self, _data: &[u8], signature: &Signature) -> Result<bool> {
            Ok(self.trusted.contains(signature))
        }
    }

    fn commit_tree(repo: &Repo, parent: Option<Checksum>, content: &[u8]) -> Checksum {
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

    fn write_remote_config(path: &Utf8Path, gpg_verify: bool) {
        let contents = format!(
            "[core]\nrepo_version=1\nmode=bare\n\n[remote \"origin\"]\nurl=http://unused.invalid\ngpg-verify={}\n",
            gpg_verify
        );
        std::fs::write(path.join("config"), contents).unwrap();
    }

    #[tokio::test]
    async fn pull_fetches_a_commit_object_by_object_when_no_delta_exists() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::ArchiveZ2).unwrap().with_fsync_disabled().unwrap();
        let to = commit_tree(&src_repo, None, b"hello world");
        // The fetcher reads directly out of src_path; a remote repo served
        // over HTTP would serve the same relative paths from its root.
        write_remote_config(src_path, false);

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        let dst_repo = Repo::create(dst_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();
        write_remote_config(dst_path, false);
        let dst_repo = Repo::open(dst_path).unwrap().with_fsync_disabled().unwrap();

        let fetcher: Arc<dyn Fetcher> = Arc::new(LocalDirFetcher::new(src_path.to_owned()));
        let request = PullRequest {
            remote: "origin",
            refs: std::slice::from_ref(&to.hex()),
            gpg_backend: None,
        };
        let report = pull(&dst_repo, fetcher, request, &NullProgressSink, CancellationToken::new())
            .await
            .unwrap();
        assert!(report.updated_refs.is_empty(), "bare-hex pulls have no named ref to stage");
        assert!(report.objects_fetched > 0);

        let reachable = traverse_commit(dst_repo.store(), &to).unwrap();
        let expected = traverse_commit(src_repo.store(), &to).unwrap();
        assert_eq!(reachable, expected);
    }

    #[tokio::test]
    async fn pull_by_named_ref_stages_and_commits_the_remote_tracking_ref() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::ArchiveZ2).unwrap().with_fsync_disabled().unwrap();
        let to = commit_tree(&src_repo, None, b"v1");
        let name = RefName::new("stable").unwrap();
        crate::refs::write_ref(&src_repo.local_ref_path(&name), &to).unwrap();
        write_remote_config(src_path, false);

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        Repo::create(dst_path, RepoMode::Bare).unwrap();
        write_remote_config(dst_path, false);
        let dst_repo = Repo::open(dst_path).unwrap().with_fsync_disabled().unwrap();

        let fetcher: Arc<dyn Fetcher> = Arc::new(LocalDirFetcher::new(src_path.to_owned()));
        let request = PullRequest {
            remote: "origin",
            refs: std::slice::from_ref(&"stable".to_owned()),
            gpg_backend: None,
        };
        let report = pull(&dst_repo, fetcher, request, &NullProgressSink, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.updated_refs.get("stable"), Some(&to));
        assert_eq!(dst_repo.try_resolve_remote_ref("origin", &name).unwrap(), Some(to));
    }

    #[tokio::test]
    async fn pull_rejects_an_unsigned_commit_when_gpg_verify_is_required() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::ArchiveZ2).unwrap().with_fsync_disabled().unwrap();
        let to = commit_tree(&src_repo, None, b"v1");
        write_remote_config(src_path, true);

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        Repo::create(dst_path, RepoMode::Bare).unwrap();
        write_remote_config(dst_path, true);
        let dst_repo = Repo::open(dst_path).unwrap().with_fsync_disabled().unwrap();

        let backend = FakeGpgBackend { trusted: vec![] };
        let fetcher: Arc<dyn Fetcher> = Arc::new(LocalDirFetcher::new(src_path.to_owned()));
        let request = PullRequest {
            remote: "origin",
            refs: std::slice::from_ref(&to.hex()),
            gpg_backend: Some(&backend),
        };
        let err = pull(&dst_repo, fetcher, request, &NullProgressSink, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSignatures));
    }

    #[tokio::test]
    async fn pull_accepts_a_commit_with_a_trusted_signature() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::ArchiveZ2).unwrap().with_fsync_disabled().unwrap();
        let to = commit_tree(&src_repo, None, b"v1");
        write_remote_config(src_path, true);

        let backend = FakeGpgBackend {
            trusted: vec![b"trusted-sig".to_vec()],
        };
        let mut detached = DetachedMetadata::new();
        detached.append_signature(b"trusted-sig".to_vec());
        src_repo.store().write_detached_metadata(&to, &detached.encode()).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        Repo::create(dst_path, RepoMode::Bare).unwrap();
        write_remote_config(dst_path, true);
        let dst_repo = Repo::open(dst_path).unwrap().with_fsync_disabled().unwrap();

        let fetcher: Arc<dyn Fetcher> = Arc::new(LocalDirFetcher::new(src_path.to_owned()));
        let request = PullRequest {
            remote: "origin",
            refs: std::slice::from_ref(&to.hex()),
            gpg_backend: Some(&backend),
        };
        pull(&dst_repo, fetcher, request, &NullProgressSink, CancellationToken::new())
            .await
            .unwrap();
        let reachable = traverse_commit(dst_repo.store(), &to).unwrap();
        assert!(reachable.contains(&(to, ObjectType::Commit)));
    }

    #[tokio::test]
    async fn pull_uses_a_static_delta_when_the_remote_has_one() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = Utf8Path::from_path(src_dir.path()).unwrap();
        let src_repo = Repo::create(src_path, RepoMode::Bare).unwrap().with_fsync_disabled().unwrap();
        let from = commit_tree(&src_repo, None, b"v1");
        let to = commit_tree(&src_repo, Some(from), b"v2");
        let name = RefName::new("stable").unwrap();
        crate::refs::write_ref(&src_repo.local_ref_path(&name), &to).unwrap();
        write_remote_config(src_path, false);

        let options = GenerateOptions {
            timestamp: Some(0),
            ..Default::default()
        };
        generate(&src_repo, Some(from), to, &options).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst_path = Utf8Path::from_path(dst_dir.path()).unwrap();
        Repo::create(dst_path, RepoMode::Bare).unwrap();
        write_remote_config(dst_path, false);
        let dst_repo = Repo::open(dst_path).unwrap().with_fsync_disabled().unwrap();
        // Seed dst with `from`'s objects and ref, as if an earlier pull
        // already landed it.
        copy_dir_recursive(&src_path.join("objects"), &dst_path.join("objects"));
        crate::refs::write_ref(&dst_repo.remote_ref_path("origin", &name), &from).unwrap();

        let fetcher: Arc<dyn Fetcher> = Arc::new(LocalDirFetcher::new(src_path.to_owned()));
        let request = PullRequest {
            remote: "origin",
            refs: std::slice::from_ref(&"stable".to_owned()),
            gpg_backend: None,
        };
        let report = pull(&dst_repo, fetcher, request, &NullProgressSink, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.updated_refs.get("stable"), Some(&to));

        let expected = traverse_commit(src_repo.store(), &to).unwrap();
        let actual = traverse_commit(dst_repo.store(), &to).unwrap();
        assert_eq!(expected, actual);
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
