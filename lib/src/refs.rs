//! Ref files under `refs/heads/<name>` and `refs/remotes/<remote>/<name>`:
//! a name pointing at a commit checksum, persisted as one 64-hex-character
//! line per file.

use std::fmt;

use camino::Utf8Path;
use camino::Utf8PathBuf;

use crate::checksum::Checksum;
use crate::error::Error;
use crate::error::Result;
use crate::file_util::persist_content_addressed_temp_file;

/// A validated ref name: non-empty path segments, no `..`, no leading `/`.
/// Branch refs may contain `/` (e.g. `stable/x86_64`); remote refs are
/// addressed separately by remote name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(String);

impl RefName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_format("ref name must not be empty"));
        }
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::invalid_format(format!("invalid ref name '{name}'")));
            }
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads the 64-hex-character checksum out of a ref file's contents,
/// rejecting anything else (invariant I5: every ref resolves to a
/// checksum-shaped string).
pub fn parse_ref_contents(contents: &str) -> Result<Checksum> {
    Checksum::from_hex(contents.trim())
}

pub fn ref_file_contents(checksum: &Checksum) -> String {
    format!("{}\n", checksum.hex())
}

pub fn local_ref_path(refs_dir: &Utf8Path, name: &RefName) -> Utf8PathBuf {
    refs_dir.join("heads").join(name.as_str())
}

pub fn remote_ref_path(refs_dir: &Utf8Path, remote: &str, name: &RefName) -> Utf8PathBuf {
    refs_dir.join("remotes").join(remote).join(name.as_str())
}

/// Reads a ref file from disk. Returns `Error::RefNotFound` (not
/// `Error::Io`) when the file is absent, so callers can treat a missing ref
/// as "nothing to pull/delta against" rather than a hard failure.
pub fn read_ref(path: &Utf8Path, display_name: &str) -> Result<Checksum> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_ref_contents(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::RefNotFound {
            name: display_name.to_owned(),
        }),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub fn try_read_ref(path: &Utf8Path) -> Result<Option<Checksum>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(parse_ref_contents(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Writes a ref file atomically: temp file in the same directory, fsync,
/// rename. Used both for direct ref updates and by `Transaction::commit`
/// when it flushes staged refs.
pub fn write_ref(path: &Utf8Path, checksum: &Checksum) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::invalid_format(format!("ref path '{path}' has no parent directory"))
    })?;
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut temp_file =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    use std::io::Write as _;
    temp_file
        .write_all(ref_file_contents(checksum).as_bytes())
        .map_err(|e| Error::io(path, e))?;
    persist_content_addressed_temp_file(temp_file, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

pub fn delete_ref(path: &Utf8Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_name_rejects_empty_segments() {
        assert!(RefName::new("").is_err());
        assert!(RefName::new("a//b").is_err());
        assert!(RefName::new("../escape").is_err());
        assert!(RefName::new("stable/x86_64").is_ok());
    }

    #[test]
    fn ref_contents_roundtrip() {
        let checksum = Checksum::of(b"example");
        let contents = ref_file_contents(&checksum);
        assert_eq!(parse_ref_contents(&contents).unwrap(), checksum);
    }

    #[test]
    fn parse_ref_contents_rejects_garbage() {
        assert!(parse_ref_contents("not-a-checksum").is_err());
    }

    #[test]
    fn write_and_read_ref_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let path = dir.join("heads").join("main");
        let checksum = Checksum::of(b"hello");
        write_ref(&path, &checksum).unwrap();
        assert_eq!(read_ref(&path, "main").unwrap(), checksum);
    }

    #[test]
    fn read_missing_ref_is_ref_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let path = dir.join("heads").join("absent");
        let err = read_ref(&path, "absent").unwrap_err();
        assert!(err.is_not_found());
    }
}
