//! `rootimage pull`: fetch whatever a remote's requested refs need to
//! become complete locally, preferring a static delta when the remote
//! publishes one.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rootimage::Repo;
use rootimage::Result;
use rootimage::fetch::HttpFetcher;
use rootimage::pull::IndicatifProgressSink;
use rootimage::pull::ProgressSink as _;
use rootimage::pull::PullRequest;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::gpg_backend::ProcessGpgBackend;

#[derive(clap::Args, Debug)]
pub struct PullArgs {
    /// Name of a `[remote "<name>"]` section in the repository's config.
    pub remote: String,

    /// Branch names or bare commit checksums to fetch. Defaults to `master`
    /// when none are given.
    pub refs: Vec<String>,

    /// GPG homedir used to verify commit and delta signatures, when the
    /// remote's `gpg-verify` config requires them.
    #[arg(long)]
    pub gpg_homedir: Option<String>,
}

#[instrument(skip_all, fields(repo = %repo_path, remote = %args.remote))]
pub async fn run(repo_path: Utf8PathBuf, args: PullArgs) -> Result<()> {
    let repo = Repo::open(repo_path)?;
    let remote_config = repo.config().remote(&args.remote)?.clone();

    let fetcher = Arc::new(HttpFetcher::new(remote_config.url.clone(), remote_config.tls_permissive)?);
    let gpg_backend = ProcessGpgBackend::new(args.gpg_homedir.clone().map(Into::into));
    let progress = IndicatifProgressSink::new();

    let refs = if args.refs.is_empty() {
        vec!["master".to_owned()]
    } else {
        args.refs.clone()
    };
    let request = PullRequest {
        remote: &args.remote,
        refs: &refs,
        gpg_backend: Some(&gpg_backend as &dyn rootimage::gpg::GpgBackend),
    };

    let report = rootimage::pull::pull(&repo, fetcher, request, &progress, CancellationToken::new()).await?;

    progress.finish("pull complete");
    for (ref_name, checksum) in &report.updated_refs {
        println!("{ref_name} -> {checksum}");
    }
    println!(
        "{} object(s) fetched, {} bytes transferred",
        report.objects_fetched, report.bytes_transferred
    );
    Ok(())
}
