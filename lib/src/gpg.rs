//! Detached commit/delta signatures.
//!
//! `lib` only defines the boundary: a [`GpgBackend`] trait the `cli` crate
//! wires to the system `gpg` binary, plus the detached-metadata map and the
//! accept-if-any-signature-verifies policy. No GPG implementation ships
//! here — it's treated as an external collaborator, not something this
//! crate reimplements.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::error::Result;

/// The well-known detached-metadata key holding the array of signatures.
pub const GPG_SIGS_KEY: &str = "ostree.gpgsigs";

/// A detached signature: opaque bytes produced by [`GpgBackend::sign`].
pub type Signature = Vec<u8>;

/// The `a{sv}`-shaped detached metadata blob stored alongside a commit
/// (`objects/<xx>/<rest>.commitmeta`) or a delta
/// (`deltas/<from>/<to>/.commitmeta`). Modeled as a string-keyed map of
/// opaque byte values; the only key this module interprets is
/// [`GPG_SIGS_KEY`], whose value is a length-prefixed array of signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachedMetadata {
    entries: BTreeMap<String, Vec<u8>>,
}

impl DetachedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signatures(&self) -> Result<Vec<Signature>> {
        match self.entries.get(GPG_SIGS_KEY) {
            Some(bytes) => decode_sig_array(bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Rewrites the signature array with one more element appended.
    pub fn append_signature(&mut self, sig: Signature) {
        let mut sigs = self.signatures().unwrap_or_default();
        sigs.push(sig);
        self.entries.insert(GPG_SIGS_KEY.to_owned(), encode_sig_array(&sigs));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, value) in &self.entries {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, len: usize| -> Result<&[u8]> {
            let end = pos.checked_add(len).ok_or_else(|| Error::invalid_format("length overflow"))?;
            let slice = data
                .get(*pos..end)
                .ok_or_else(|| Error::invalid_format("truncated detached metadata"))?;
            *pos = end;
            Ok(slice)
        };
        let u32_at = |pos: &mut usize| -> Result<u32> {
            Ok(u32::from_le_bytes(take(pos, 4)?.try_into().unwrap()))
        };
        let count = u32_at(&mut pos)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key_len = u32_at(&mut pos)? as usize;
            let key = String::from_utf8(take(&mut pos, key_len)?.to_vec())
                .map_err(|e| Error::invalid_format(format!("invalid UTF-8 key: {e}")))?;
            let value_len = u32_at(&mut pos)? as usize;
            let value = take(&mut pos, value_len)?.to_vec();
            entries.insert(key, value);
        }
        if pos != data.len() {
            return Err(Error::invalid_format("trailing bytes after detached metadata"));
        }
        Ok(Self { entries })
    }
}

fn encode_sig_array(sigs: &[Signature]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(sigs.len() as u32).to_le_bytes());
    for sig in sigs {
        out.extend_from_slice(&(sig.len() as u32).to_le_bytes());
        out.extend_from_slice(sig);
    }
    out
}

fn decode_sig_array(data: &[u8]) -> Result<Vec<Signature>> {
    if data.len() < 4 {
        return Err(Error::invalid_format("truncated signature array"));
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut pos = 4;
    let mut sigs = Vec::with_capacity(count);
    for _ in 0..count {
        let len_bytes = data
            .get(pos..pos + 4)
            .ok_or_else(|| Error::invalid_format("truncated signature length"))?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        pos += 4;
        let sig = data
            .get(pos..pos + len)
            .ok_or_else(|| Error::invalid_format("truncated signature bytes"))?
            .to_vec();
        pos += len;
        sigs.push(sig);
    }
    Ok(sigs)
}

/// External collaborator boundary for signing/verifying. `lib` calls
/// through this trait only; `cli` supplies an implementation that shells
/// out to the system `gpg` binary.
pub trait GpgBackend {
    /// Produces a detached signature over `data` using `key_id`, optionally
    /// scoped to a specific GPG homedir.
    fn sign(&self, data: &[u8], key_id: &str, homedir: Option<&str>) -> Result<Signature>;

    /// Verifies `data` against a single detached `signature`, checking it
    /// against the keyrings configured on this backend. Returns whether the
    /// signature is trusted.
    fn verify_one(&self, data: &[u8], signature: &Signature) -> Result<bool>;
}

/// Verifies `data` against every signature in `metadata`, accepting if any
/// one of them verifies. Fails with [`Error::MissingSignatures`] if
/// `metadata` carries no [`GPG_SIGS_KEY`] entry at all, and
/// [`Error::UntrustedSignature`] if signatures are present but none verify.
pub fn verify_any(backend: &dyn GpgBackend, data: &[u8], metadata: &DetachedMetadata) -> Result<()> {
    let sigs = metadata.signatures()?;
    if sigs.is_empty() {
        return Err(Error::MissingSignatures);
    }
    for sig in &sigs {
        if backend.verify_one(data, sig)? {
            return Ok(());
        }
    }
    Err(Error::UntrustedSignature)
}
