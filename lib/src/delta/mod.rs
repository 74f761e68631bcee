//! The static-delta subsystem: binary format (§4.G), generator (§4.H), and
//! offline applier (§4.I).

pub mod apply;
pub mod format;
pub mod generate;

pub use format::Compression;
pub use format::FallbackHeader;
pub use format::Operation;
pub use format::Part;
pub use format::PartHeader;
pub use format::PartObjectRef;
pub use format::PartPayload;
pub use format::Superblock;
