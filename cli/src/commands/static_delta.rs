//! `rootimage static-delta`: list what's staged under `deltas/`, apply a
//! staged delta offline, or generate a new one between two known commits.

use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use rootimage::Checksum;
use rootimage::Error;
use rootimage::RefName;
use rootimage::Repo;
use rootimage::Result;
use rootimage::delta::Superblock;
use rootimage::delta::apply;
use rootimage::delta::generate::GenerateOptions;
use rootimage::delta::generate::generate;
use rootimage::gpg::DetachedMetadata;
use rootimage::gpg::GpgBackend;
use tracing::instrument;

use crate::gpg_backend::ProcessGpgBackend;

#[derive(clap::Subcommand, Debug)]
pub enum StaticDeltaCommand {
    /// List the `from -> to` transitions currently staged under `deltas/`.
    List,
    /// Apply a delta staged on disk at `--apply` against this repository.
    Apply(ApplyArgs),
    /// Generate a new delta for the `--from -> --to` commit transition.
    Generate(GenerateArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApplyArgs {
    /// Directory holding the delta's `meta` file and numbered parts.
    #[arg(long)]
    pub apply: Utf8PathBuf,

    /// Skip re-verifying each part's checksum before decoding it (use only
    /// when an outer signature check already established the delta's
    /// integrity).
    #[arg(long)]
    pub skip_validation: bool,
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// Source revision: a 64-hex commit checksum, or empty for a
    /// from-scratch delta.
    #[arg(long)]
    pub from: Option<String>,

    /// Target revision: a 64-hex commit checksum or local ref name.
    #[arg(long)]
    pub to: String,

    /// Maximum size, in MiB, of a packed part or a single object before it's
    /// moved to the fallback list.
    #[arg(long, default_value_t = 128)]
    pub max_usize: u32,

    /// GPG key IDs to sign the generated superblock with. May be repeated.
    #[arg(long = "gpg-sign")]
    pub gpg_sign: Vec<String>,

    /// GPG homedir to use when signing.
    #[arg(long)]
    pub gpg_homedir: Option<String>,
}

fn resolve_rev(repo: &Repo, rev: &str) -> Result<Checksum> {
    if Checksum::looks_like_hex(rev) {
        return Checksum::from_hex(rev);
    }
    let ref_name = RefName::new(rev.to_owned())?;
    repo.resolve_local_ref(&ref_name)
}

#[instrument(skip_all, fields(repo = %repo_path))]
pub fn run(repo_path: Utf8PathBuf, command: StaticDeltaCommand) -> Result<()> {
    match command {
        StaticDeltaCommand::List => run_list(repo_path),
        StaticDeltaCommand::Apply(args) => run_apply(repo_path, args),
        StaticDeltaCommand::Generate(args) => run_generate(repo_path, args),
    }
}

fn run_list(repo_path: Utf8PathBuf) -> Result<()> {
    let repo = Repo::open(repo_path)?;
    let deltas_dir = repo.deltas_dir();
    if !deltas_dir.exists() {
        return Ok(());
    }
    for from_entry in std::fs::read_dir(&deltas_dir).map_err(|e| Error::io(&deltas_dir, e))? {
        let from_entry = from_entry.map_err(|e| Error::io(&deltas_dir, e))?;
        if !from_entry.file_type().map_err(|e| Error::io(&deltas_dir, e))?.is_dir() {
            continue;
        }
        let from_name = from_entry.file_name();
        let from_name = from_name.to_string_lossy();
        let from_path = from_entry.path();
        for to_entry in std::fs::read_dir(&from_path).map_err(|e| Error::io(&deltas_dir, e))? {
            let to_entry = to_entry.map_err(|e| Error::io(&deltas_dir, e))?;
            if !to_entry.file_type().map_err(|e| Error::io(&deltas_dir, e))?.is_dir() {
                continue;
            }
            let to_name = to_entry.file_name();
            let to_name = to_name.to_string_lossy();
            let label = if from_name.is_empty() {
                format!("(scratch) -> {to_name}")
            } else {
                format!("{from_name} -> {to_name}")
            };

            let to_dir = Utf8PathBuf::from_path_buf(to_entry.path())
                .unwrap_or_else(|path| panic!("non-UTF-8 delta directory path: {}", path.display()));
            match read_superblock(&to_dir.join("meta")) {
                Ok(superblock) => {
                    let timestamp = DateTime::<Utc>::from_timestamp(superblock.timestamp, 0)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| superblock.timestamp.to_string());
                    println!(
                        "{label}  {timestamp}  \"{}\"  {} part(s), {} fallback(s)",
                        superblock.to_commit.subject,
                        superblock.parts.len(),
                        superblock.fallbacks.len(),
                    );
                }
                Err(_) => println!("{label}  (no meta file)"),
            }
        }
    }
    Ok(())
}

fn read_superblock(meta_path: &camino::Utf8Path) -> Result<Superblock> {
    let bytes = std::fs::read(meta_path).map_err(|e| Error::io(meta_path, e))?;
    Superblock::decode(&bytes)
}

fn run_apply(repo_path: Utf8PathBuf, args: ApplyArgs) -> Result<()> {
    let repo = Repo::open(repo_path)?;
    let superblock = apply::apply(&args.apply, &repo, args.skip_validation)?;
    println!("applied delta to {}", superblock.to);
    Ok(())
}

fn run_generate(repo_path: Utf8PathBuf, args: GenerateArgs) -> Result<()> {
    let repo = Repo::open(repo_path)?;

    let from = args.from.as_deref().map(|rev| resolve_rev(&repo, rev)).transpose()?;
    let to = resolve_rev(&repo, &args.to)?;

    let options = GenerateOptions {
        max_part_size_bytes: args.max_usize.saturating_mul(1024 * 1024),
        ..Default::default()
    };
    let superblock = generate(&repo, from, to, &options)?;

    if !args.gpg_sign.is_empty() {
        let backend = ProcessGpgBackend::new(args.gpg_homedir.clone().map(Into::into));
        let mut detached = DetachedMetadata::new();
        let meta_bytes = superblock.encode();
        for key_id in &args.gpg_sign {
            let sig = backend.sign(&meta_bytes, key_id, args.gpg_homedir.as_deref())?;
            detached.append_signature(sig);
        }
        let from_hex = from.map(|c| c.hex()).unwrap_or_default();
        let to_hex = to.hex();
        let commitmeta_path = repo.deltas_dir().join(&from_hex).join(&to_hex).join(".commitmeta");
        std::fs::write(&commitmeta_path, detached.encode()).map_err(|e| Error::io(&commitmeta_path, e))?;
    }

    println!("generated delta {} -> {}", from.map(|c| c.hex()).unwrap_or_default(), to);
    Ok(())
}
