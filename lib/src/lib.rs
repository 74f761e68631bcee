//! `rootimage` is a content-addressed object store for filesystem trees:
//! immutable commits built from directory-tree and directory-metadata
//! objects, an async pull engine that fetches a remote's reachable set with
//! at-most-once semantics, and a static-delta format for offline updates
//! between two known commits.

pub mod checksum;
pub(crate) mod codec;
pub mod config;
pub mod delta;
pub mod error;
pub mod file_util;
pub mod fetch;
pub mod fsck;
pub mod gpg;
pub mod objects;
pub mod pull;
pub mod refs;
pub mod repo;
pub mod store;
pub mod traverse;

pub use checksum::Checksum;
pub use config::Config;
pub use config::RepoMode;
pub use error::Error;
pub use error::Result;
pub use objects::ObjectType;
pub use refs::RefName;
pub use repo::Repo;

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::TempDir;

    /// A fresh temp directory, parallel to every other module's unit tests.
    pub fn new_temp_dir() -> TempDir {
        tempfile::Builder::new()
            .prefix("rootimage-test-")
            .tempdir()
            .unwrap()
    }

    /// The running process's own uid/gid, for bare-mode tests that write a
    /// real file and need `chown` to succeed without root (the kernel
    /// permits chowning a file you own to your own uid/gid unprivileged).
    #[cfg(unix)]
    pub fn current_uid_gid() -> (u32, u32) {
        (rustix::process::getuid().as_raw(), rustix::process::getgid().as_raw())
    }

    #[cfg(not(unix))]
    pub fn current_uid_gid() -> (u32, u32) {
        (0, 0)
    }
}
