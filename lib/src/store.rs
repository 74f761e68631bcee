//! The loose-object store: on-disk layout under `objects/<xx>/<rest>.<ext>`,
//! content-addressed writes (grounded in
//! [`crate::file_util::persist_content_addressed_temp_file`], the same
//! temp-file-then-rename pattern the backend in this codebase's ancestry
//! uses for its own `files/`/`trees/`/`commits/` directories), and the
//! archive-mode compressed representation with its write-through
//! decompression cache.

use std::io::Read as _;
use std::io::Write as _;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::checksum::Checksum;
use crate::checksum::StreamingHasher;
use crate::config::RepoMode;
use crate::error::Error;
use crate::error::Result;
use crate::file_util::persist_content_addressed_temp_file;
use crate::objects::ObjectType;

/// Computes the `objects/<xx>/<rest>.<ext>` path for an object.
pub fn object_path(objects_dir: &Utf8Path, checksum: &Checksum, ext: &str) -> Utf8PathBuf {
    let hex = checksum.hex();
    let (prefix, rest) = hex.split_at(2);
    objects_dir.join(prefix).join(format!("{rest}.{ext}"))
}

/// Decodes an archive-mode `File` object's bytes (header followed by a
/// zlib-compressed content stream) into the header and raw, decompressed
/// content — independent of any local store's own mode. Used by the pull
/// engine, since a remote is always archive mode on the wire regardless of
/// what mode the local repo stores objects in.
pub fn decode_archive_content(data: &[u8]) -> Result<(crate::objects::FileHeader, Vec<u8>)> {
    let (header, offset) = crate::objects::FileHeader::decode_prefix(data)?;
    let mut decoder = ZlibDecoder::new(&data[offset..]);
    let mut content = Vec::with_capacity(header.size as usize);
    decoder
        .read_to_end(&mut content)
        .map_err(|e| Error::invalid_format(format!("archive content decompression failed: {e}")))?;
    Ok((header, content))
}

/// A read-only view over a store used by traversal and the pull engine;
/// implemented by [`LooseObjectStore`] directly and composed across a
/// parent-repo chain.
pub trait ObjectReader {
    fn has_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<bool>;
    fn load_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<Vec<u8>>;
}

/// Manages one repository's `objects/` directory (and, transitively, its
/// parent chain and its `uncompressed-objects-cache/`). Bare mode stores
/// exact filesystem bytes; archive mode stores a zlib-compressed
/// [`crate::objects::FileHeader`]-prefixed blob for `File` objects and
/// plain canonical bytes for metadata objects.
pub struct LooseObjectStore {
    objects_dir: Utf8PathBuf,
    tmp_dir: Utf8PathBuf,
    uncompressed_cache_dir: Utf8PathBuf,
    mode: RepoMode,
    disable_fsync: bool,
    parent: Option<Box<LooseObjectStore>>,
}

impl LooseObjectStore {
    pub fn new(
        repo_dir: &Utf8Path,
        mode: RepoMode,
        disable_fsync: bool,
        parent: Option<LooseObjectStore>,
    ) -> Self {
        Self {
            objects_dir: repo_dir.join("objects"),
            tmp_dir: repo_dir.join("tmp"),
            uncompressed_cache_dir: repo_dir.join("uncompressed-objects-cache"),
            mode,
            disable_fsync,
            parent: parent.map(Box::new),
        }
    }

    pub fn mode(&self) -> RepoMode {
        self.mode
    }

    fn ext(&self, object_type: ObjectType) -> &'static str {
        match self.mode {
            RepoMode::Bare => object_type.ext_bare(),
            RepoMode::ArchiveZ2 => object_type.ext_archive(),
        }
    }

    fn local_path(&self, object_type: ObjectType, checksum: &Checksum) -> Utf8PathBuf {
        object_path(&self.objects_dir, checksum, self.ext(object_type))
    }

    fn has_local(&self, object_type: ObjectType, checksum: &Checksum) -> Result<bool> {
        let path = self.local_path(object_type, checksum);
        if object_type == ObjectType::File && self.mode == RepoMode::Bare {
            // A bare-mode File object may be a symlink whose target string
            // is arbitrary stored data, not a path that resolves on this
            // filesystem — `try_exists` follows symlinks and would report a
            // dangling one as absent, so check the link itself.
            return self.has_bare_file(&path);
        }
        path.try_exists().map_err(|e| Error::io(&path, e))
    }

    fn has_bare_file(&self, path: &Utf8Path) -> Result<bool> {
        match std::fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Reads the raw on-disk bytes for an object, decompressing archive-mode
    /// `File` objects so the caller always sees plain canonical bytes (for
    /// metadata objects) or plain file content (for `File` objects), with
    /// ownership/mode/xattr metadata returned separately via
    /// [`Self::load_file`].
    pub fn load_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<Vec<u8>> {
        if object_type == ObjectType::File {
            return Ok(self.load_file(checksum)?.1);
        }
        self.load_raw(object_type, checksum)
    }

    /// Loads a `File` object's canonical packed representation: its header
    /// followed by the uncompressed content bytes. This is the
    /// representation the static-delta generator packs into a part and the
    /// applier feeds straight back to [`Self::write_file_bytes`], as
    /// opposed to [`Self::load_object`], which strips the header for
    /// ordinary consumers.
    pub fn load_file_object_bytes(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        let (header, content) = self.load_file(checksum)?;
        let mut bytes = header.encode();
        bytes.extend_from_slice(&content);
        Ok(bytes)
    }

    /// The on-disk size of a loose object (compressed size in archive
    /// mode), used by the delta generator to size the fallback list and by
    /// `fsck` to report sizes.
    pub fn query_storage_size(&self, object_type: ObjectType, checksum: &Checksum) -> Result<u64> {
        let path = self.local_path(object_type, checksum);
        let meta = if object_type == ObjectType::File && self.mode == RepoMode::Bare {
            std::fs::symlink_metadata(&path)
        } else {
            std::fs::metadata(&path)
        };
        match meta {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = &self.parent {
                    return parent.query_storage_size(object_type, checksum);
                }
                Err(Error::NotFound {
                    object_type,
                    checksum: *checksum,
                })
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Writes a `File` object from its already-encoded `(header, content)`
    /// bytes, as produced by [`Self::load_file_object_bytes`] or decoded
    /// from a static-delta part. Equivalent to decoding the header prefix
    /// and calling [`Self::write_file`].
    pub fn write_file_bytes(&self, bytes: &[u8]) -> Result<Checksum> {
        let (header, offset) = crate::objects::FileHeader::decode_prefix(bytes)?;
        self.write_file(&header, &bytes[offset..])
    }

    fn load_raw(&self, object_type: ObjectType, checksum: &Checksum) -> Result<Vec<u8>> {
        let path = self.local_path(object_type, checksum);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = &self.parent {
                    return parent.load_raw(object_type, checksum);
                }
                Err(Error::NotFound {
                    object_type,
                    checksum: *checksum,
                })
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Loads a `File` object, returning its header and decompressed content.
    /// In archive mode, successful decompressions are cached under
    /// `uncompressed-objects-cache/` keyed by the archive checksum, so a
    /// repeated read of a large file only pays the zlib cost once.
    pub fn load_file(&self, checksum: &Checksum) -> Result<(crate::objects::FileHeader, Vec<u8>)> {
        match self.mode {
            RepoMode::Bare => {
                let path = self.local_path(ObjectType::File, checksum);
                let meta = match std::fs::symlink_metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        if let Some(parent) = &self.parent {
                            return parent.load_file(checksum);
                        }
                        return Err(Error::NotFound {
                            object_type: ObjectType::File,
                            checksum: *checksum,
                        });
                    }
                    Err(e) => return Err(Error::io(path, e)),
                };
                self.load_file_bare(&path, &meta)
            }
            RepoMode::ArchiveZ2 => {
                if let Some(cached) = self.read_uncompressed_cache(checksum)? {
                    return Ok(cached);
                }
                let raw = self.load_raw(ObjectType::File, checksum)?;
                let (header, offset) = crate::objects::FileHeader::decode_prefix(&raw)?;
                let mut decoder = ZlibDecoder::new(&raw[offset..]);
                let mut content = Vec::with_capacity(header.size as usize);
                decoder
                    .read_to_end(&mut content)
                    .map_err(|e| Error::io(&self.objects_dir, e))?;
                self.write_uncompressed_cache(checksum, &header, &content)?;
                Ok((header, content))
            }
        }
    }

    fn read_uncompressed_cache(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<(crate::objects::FileHeader, Vec<u8>)>> {
        let path = object_path(&self.uncompressed_cache_dir, checksum, "file");
        match std::fs::read(&path) {
            Ok(data) => {
                let (header, offset) = crate::objects::FileHeader::decode_prefix(&data)?;
                Ok(Some((header, data[offset..].to_vec())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn write_uncompressed_cache(
        &self,
        checksum: &Checksum,
        header: &crate::objects::FileHeader,
        content: &[u8],
    ) -> Result<()> {
        let path = object_path(&self.uncompressed_cache_dir, checksum, "file");
        let mut bytes = header.encode();
        bytes.extend_from_slice(content);
        self.persist_bytes(&path, &bytes)
    }

    /// Writes a metadata object (COMMIT, DIR_TREE, DIR_META), returning its
    /// checksum. The checksum is always computed over the plain canonical
    /// bytes, regardless of store mode (I1).
    pub fn write_metadata(&self, object_type: ObjectType, canonical_bytes: &[u8]) -> Result<Checksum> {
        debug_assert!(object_type.is_metadata());
        let checksum = Checksum::of(canonical_bytes);
        let path = self.local_path(object_type, &checksum);
        self.persist_bytes(&path, canonical_bytes)?;
        Ok(checksum)
    }

    /// Writes a `File` object from already-known header and content. The
    /// checksum is always the hash of header+content (I1), independent of
    /// how the object ends up stored on disk. In bare mode the header is
    /// never written to disk at all: the object is the literal filesystem
    /// object (a real file with `header`'s mode/uid/gid/xattrs, or a real
    /// symlink when `header.symlink_target` is set), matching a real
    /// checkout byte-for-byte. In archive mode the header is written
    /// followed by zlib-compressed content.
    pub fn write_file(
        &self,
        header: &crate::objects::FileHeader,
        content: &[u8],
    ) -> Result<Checksum> {
        let mut hasher = StreamingHasher::new();
        hasher.update(&header.encode());
        hasher.update(content);
        let checksum = hasher.finalize();

        let path = self.local_path(ObjectType::File, &checksum);
        match self.mode {
            RepoMode::Bare => {
                if !self.has_bare_file(&path)? {
                    self.write_file_bare(&path, header, content)?;
                }
            }
            RepoMode::ArchiveZ2 => {
                let mut bytes = header.encode();
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(content)
                    .map_err(|e| Error::io(&self.objects_dir, e))?;
                bytes.extend(encoder.finish().map_err(|e| Error::io(&self.objects_dir, e))?);
                self.persist_bytes(&path, &bytes)?;
            }
        }
        Ok(checksum)
    }

    fn persist_bytes(&self, path: &Utf8Path, bytes: &[u8]) -> Result<()> {
        if path.try_exists().map_err(|e| Error::io(path, e))? {
            // Identical content already present under this checksum; I1
            // guarantees it can only differ by exactly these bytes.
            return Ok(());
        }
        let dir = path.parent().expect("object_path always has a parent");
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        std::fs::create_dir_all(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        let mut temp_file =
            tempfile::NamedTempFile::new_in(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        temp_file
            .write_all(bytes)
            .map_err(|e| Error::io(path, e))?;
        if self.disable_fsync {
            temp_file
                .persist(path)
                .map_err(|e| Error::io(path, e.error))?;
        } else {
            persist_content_addressed_temp_file(temp_file, path).map_err(|e| Error::io(path, e))?;
        }
        Ok(())
    }

    /// Writes a bare-mode `File` object as a literal filesystem object:
    /// a real regular file carrying `header`'s mode/uid/gid/xattrs, or a
    /// real symlink when `header.symlink_target` is set. Built and staged
    /// under `tmp_dir` before the final rename so a crash never leaves a
    /// partially-chowned or partially-written object at the content path.
    #[cfg(unix)]
    fn write_file_bare(&self, path: &Utf8Path, header: &crate::objects::FileHeader, content: &[u8]) -> Result<()> {
        use std::os::unix::fs::PermissionsExt as _;

        use rustix::fs::Gid;
        use rustix::fs::Uid;
        use rustix::fs::XattrFlags;

        let dir = path.parent().expect("object_path always has a parent");
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        std::fs::create_dir_all(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;

        let uid = Uid::from_raw(header.uid);
        let gid = Gid::from_raw(header.gid);

        if let Some(target) = &header.symlink_target {
            // `NamedTempFile` can only create regular files, so we carve out
            // a free path for the symlink by creating then removing a
            // placeholder, the same way as everywhere else a tempfile-based
            // temp name is needed for a non-regular-file rename target.
            let placeholder =
                tempfile::NamedTempFile::new_in(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
            let tmp_path = placeholder.into_temp_path();
            std::fs::remove_file(&tmp_path).map_err(|e| Error::io(path, e))?;
            std::os::unix::fs::symlink(target, &tmp_path).map_err(|e| Error::io(path, e))?;
            rustix::fs::lchown(&tmp_path, Some(uid), Some(gid)).map_err(|e| Error::io(path, std::io::Error::from(e)))?;
            for (name, value) in &header.xattrs {
                let name = std::str::from_utf8(name)
                    .map_err(|_| Error::invalid_format("xattr name is not valid UTF-8"))?;
                rustix::fs::lsetxattr(&tmp_path, name, value, XattrFlags::empty())
                    .map_err(|e| Error::io(path, std::io::Error::from(e)))?;
            }
            std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
            Ok(())
        } else {
            let mut temp_file =
                tempfile::NamedTempFile::new_in(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
            temp_file.write_all(content).map_err(|e| Error::io(path, e))?;
            temp_file
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(header.mode & 0o7777))
                .map_err(|e| Error::io(path, e))?;
            rustix::fs::chown(temp_file.path(), Some(uid), Some(gid))
                .map_err(|e| Error::io(path, std::io::Error::from(e)))?;
            for (name, value) in &header.xattrs {
                let name = std::str::from_utf8(name)
                    .map_err(|_| Error::invalid_format("xattr name is not valid UTF-8"))?;
                rustix::fs::setxattr(temp_file.path(), name, value, XattrFlags::empty())
                    .map_err(|e| Error::io(path, std::io::Error::from(e)))?;
            }
            if self.disable_fsync {
                temp_file.persist(path).map_err(|e| Error::io(path, e.error))?;
            } else {
                persist_content_addressed_temp_file(temp_file, path).map_err(|e| Error::io(path, e))?;
            }
            Ok(())
        }
    }

    #[cfg(not(unix))]
    fn write_file_bare(&self, _path: &Utf8Path, _header: &crate::objects::FileHeader, _content: &[u8]) -> Result<()> {
        Err(Error::invalid_format("bare-mode object storage requires a Unix filesystem"))
    }

    /// Reconstructs a `File` object's header and content from a literal
    /// filesystem object written by [`Self::write_file_bare`], reading
    /// uid/gid/mode/rdev and the symlink target or regular-file content
    /// straight off the real object rather than trusting a stored header.
    #[cfg(unix)]
    fn load_file_bare(&self, path: &Utf8Path, meta: &std::fs::Metadata) -> Result<(crate::objects::FileHeader, Vec<u8>)> {
        use std::os::unix::fs::MetadataExt as _;

        let uid = meta.uid();
        let gid = meta.gid();
        let mode = meta.mode();
        let rdev = meta.rdev() as u32;
        let is_symlink = meta.file_type().is_symlink();

        let (symlink_target, content, size) = if is_symlink {
            let target = std::fs::read_link(path).map_err(|e| Error::io(path, e))?;
            let target = target
                .into_os_string()
                .into_string()
                .map_err(|_| Error::invalid_format("symlink target is not valid UTF-8"))?;
            let size = target.len() as u64;
            (Some(target), Vec::new(), size)
        } else {
            let content = std::fs::read(path).map_err(|e| Error::io(path, e))?;
            let size = content.len() as u64;
            (None, content, size)
        };

        let xattrs = self.load_bare_xattrs(path, is_symlink)?;

        Ok((
            crate::objects::FileHeader {
                size,
                uid,
                gid,
                mode,
                rdev,
                symlink_target,
                xattrs,
            },
            content,
        ))
    }

    #[cfg(not(unix))]
    fn load_file_bare(&self, _path: &Utf8Path, _meta: &std::fs::Metadata) -> Result<(crate::objects::FileHeader, Vec<u8>)> {
        Err(Error::invalid_format("bare-mode object storage requires a Unix filesystem"))
    }

    /// Lists and reads every xattr on a bare-mode object, sorted by name so
    /// the reconstructed header has a deterministic xattr order regardless
    /// of kernel listing order. Grows the read buffer and retries on
    /// `ERANGE`, since neither the name list nor any single value has a
    /// fixed upper bound.
    #[cfg(unix)]
    fn load_bare_xattrs(&self, path: &Utf8Path, is_symlink: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut buf = vec![0u8; 1024];
        let list_len = loop {
            let result = if is_symlink {
                rustix::fs::llistxattr(path, &mut buf)
            } else {
                rustix::fs::listxattr(path, &mut buf)
            };
            match result {
                Ok(len) => break len,
                Err(rustix::io::Errno::RANGE) => {
                    buf.resize(buf.len() * 2, 0);
                }
                Err(e) => return Err(Error::io(path, std::io::Error::from(e))),
            }
        };

        let mut names: Vec<Vec<u8>> = buf[..list_len]
            .split(|&b| b == 0)
            .filter(|n| !n.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
        names.sort();

        let mut xattrs = Vec::with_capacity(names.len());
        for name in names {
            let name_str = std::str::from_utf8(&name)
                .map_err(|_| Error::invalid_format("xattr name is not valid UTF-8"))?;
            let mut value_buf = vec![0u8; 1024];
            let value_len = loop {
                let result = if is_symlink {
                    rustix::fs::lgetxattr(path, name_str, &mut value_buf)
                } else {
                    rustix::fs::getxattr(path, name_str, &mut value_buf)
                };
                match result {
                    Ok(len) => break len,
                    Err(rustix::io::Errno::RANGE) => {
                        value_buf.resize(value_buf.len() * 2, 0);
                    }
                    Err(e) => return Err(Error::io(path, std::io::Error::from(e))),
                }
            };
            value_buf.truncate(value_len);
            xattrs.push((name, value_buf));
        }
        Ok(xattrs)
    }

    /// Writes a commit's detached GPG metadata blob alongside the commit
    /// object, at `objects/<xx>/<rest>.commitmeta`. Unlike ordinary objects
    /// this is keyed by the commit's own checksum rather than a hash of its
    /// own contents, so a re-signed commit can replace its metadata in place.
    pub fn write_detached_metadata(&self, commit_checksum: &Checksum, bytes: &[u8]) -> Result<()> {
        let path = object_path(&self.objects_dir, commit_checksum, "commitmeta");
        let dir = path.parent().expect("object_path always has a parent");
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        std::fs::create_dir_all(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        let mut temp_file =
            tempfile::NamedTempFile::new_in(&self.tmp_dir).map_err(|e| Error::io(&self.tmp_dir, e))?;
        temp_file.write_all(bytes).map_err(|e| Error::io(&path, e))?;
        temp_file.persist(&path).map_err(|e| Error::io(&path, e.error))?;
        Ok(())
    }

    /// Reads a commit's detached GPG metadata blob, if any.
    pub fn load_detached_metadata(&self, commit_checksum: &Checksum) -> Result<Option<Vec<u8>>> {
        let path = object_path(&self.objects_dir, commit_checksum, "commitmeta");
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match &self.parent {
                    Some(parent) => parent.load_detached_metadata(commit_checksum),
                    None => Ok(None),
                }
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Unlinks a loose object. Missing is an error: `delete_object` does not
    /// silently ignore an absent object, unlike the ref-delete path.
    pub fn delete_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<()> {
        let path = self.local_path(object_type, checksum);
        std::fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    object_type,
                    checksum: *checksum,
                }
            } else {
                Error::io(&path, e)
            }
        })
    }

    /// Walks `objects/*/*`, yielding every loose object's type and checksum.
    /// Unrecognized extensions are logged and skipped rather than treated as
    /// a fatal error, since a store directory may carry files this version
    /// doesn't know about.
    pub fn list_loose(&self) -> Result<Vec<(ObjectType, Checksum)>> {
        let mut out = Vec::new();
        let top = match std::fs::read_dir(&self.objects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::io(&self.objects_dir, e)),
        };
        for prefix_entry in top {
            let prefix_entry = prefix_entry.map_err(|e| Error::io(&self.objects_dir, e))?;
            let prefix_path = prefix_entry.path();
            if !prefix_path.is_dir() {
                continue;
            }
            let Some(prefix) = prefix_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if prefix.len() != 2 {
                continue;
            }
            for entry in std::fs::read_dir(&prefix_path).map_err(|e| Error::io(&prefix_path, e))? {
                let entry = entry.map_err(|e| Error::io(&prefix_path, e))?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some((rest, ext)) = name.split_once('.') else {
                    tracing::warn!(file = name, "loose object file has no extension, skipping");
                    continue;
                };
                let Some(object_type) = ObjectType::from_ext(ext) else {
                    tracing::warn!(file = name, ext, "unrecognized loose object extension, skipping");
                    continue;
                };
                let hex = format!("{prefix}{rest}");
                match Checksum::from_hex(&hex) {
                    Ok(checksum) => out.push((object_type, checksum)),
                    Err(_) => {
                        tracing::warn!(file = name, "loose object file name is not a valid checksum, skipping");
                    }
                }
            }
        }
        Ok(out)
    }
}

impl ObjectReader for LooseObjectStore {
    fn has_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<bool> {
        if self.has_local(object_type, checksum)? {
            return Ok(true);
        }
        match &self.parent {
            Some(parent) => parent.has_object(object_type, checksum),
            None => Ok(false),
        }
    }

    fn load_object(&self, object_type: ObjectType, checksum: &Checksum) -> Result<Vec<u8>> {
        LooseObjectStore::load_object(self, object_type, checksum)
    }
}
