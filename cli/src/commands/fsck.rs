//! `rootimage fsck`: walk every loose object in the repository, report the
//! ones whose content doesn't hash back to their own name, and optionally
//! delete them.

use camino::Utf8PathBuf;
use rootimage::Repo;
use rootimage::Result;
use tracing::instrument;

#[derive(clap::Args, Debug)]
pub struct FsckArgs {
    /// Don't print one line per object checked, only corruption reports.
    #[arg(long)]
    pub quiet: bool,

    /// Unlink each corrupt object as it's found, instead of only reporting it.
    #[arg(long)]
    pub delete: bool,
}

/// Runs the check and returns whether the store came out clean.
#[instrument(skip(args), fields(repo = %repo_path))]
pub fn run(repo_path: Utf8PathBuf, args: FsckArgs) -> Result<bool> {
    let repo = Repo::open(repo_path)?;
    let report = rootimage::fsck::fsck(repo.store(), args.delete)?;

    if !args.quiet {
        println!("checked {} object(s)", report.checked);
    }
    for corruption in &report.corrupt {
        match corruption.actual {
            Some(actual) => println!(
                "ChecksumMismatch: {} {} recomputes to {actual}",
                corruption.object_type, corruption.checksum
            ),
            None => println!(
                "InvalidFormat: {} {} could not be decoded",
                corruption.object_type, corruption.checksum
            ),
        }
    }
    if args.delete {
        for (object_type, checksum) in &report.deleted {
            println!("deleted {object_type} {checksum}");
        }
    }

    Ok(report.is_ok())
}
