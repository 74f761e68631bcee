//! Front end for the `rootimage` object store: `fsck`, `static-delta`, and
//! `pull`. Everything else — building commits, importing trees, checking
//! out a workdir — is out of scope for this binary.

mod commands;
mod gpg_backend;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

use crate::commands::fsck::FsckArgs;
use crate::commands::pull::PullArgs;
use crate::commands::static_delta::StaticDeltaCommand;

#[derive(Parser, Debug)]
#[command(name = "rootimage", about = "Content-addressed object store for filesystem trees")]
struct Cli {
    /// Path to the repository. Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    repo: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify every loose object's content against its own checksum.
    Fsck(FsckArgs),
    /// Inspect, apply, or generate binary static-delta updates.
    StaticDelta {
        #[command(subcommand)]
        command: StaticDeltaCommand,
    },
    /// Fetch a remote's reachable objects for the named refs.
    Pull(PullArgs),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Fsck(args) => match commands::fsck::run(cli.repo, args) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(e) => {
                tracing::error!("{e}");
                1
            }
        },
        Command::StaticDelta { command } => match commands::static_delta::run(cli.repo, command) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("{e}");
                1
            }
        },
        Command::Pull(args) => match commands::pull::run(cli.repo, args).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("{e}");
                1
            }
        },
    };

    std::process::exit(exit_code);
}
