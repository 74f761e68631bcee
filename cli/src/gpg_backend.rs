//! A `GpgBackend` that shells out to the system `gpg` binary — the GPG
//! engine itself is treated as an external collaborator; this is the thin
//! process-invocation glue `lib` deliberately doesn't own.

use std::io::Write as _;
use std::process::Command;
use std::process::Stdio;

use camino::Utf8PathBuf;
use rootimage::Error;
use rootimage::Result;
use rootimage::gpg::GpgBackend;
use rootimage::gpg::Signature;
use tempfile::NamedTempFile;

/// Invokes `gpg --homedir <homedir> ...` for every operation. `homedir` is
/// fixed at construction time for verification (the configured keyring);
/// signing may override it per call via `--gpg-homedir`.
pub struct ProcessGpgBackend {
    homedir: Option<Utf8PathBuf>,
}

impl ProcessGpgBackend {
    pub fn new(homedir: Option<Utf8PathBuf>) -> Self {
        Self { homedir }
    }

    fn base_command(&self, homedir: Option<&str>) -> Command {
        let mut command = Command::new("gpg");
        command.arg("--batch").arg("--yes");
        if let Some(dir) = homedir.or(self.homedir.as_deref().map(|p| p.as_str())) {
            command.arg("--homedir").arg(dir);
        }
        command
    }
}

impl GpgBackend for ProcessGpgBackend {
    fn sign(&self, data: &[u8], key_id: &str, homedir: Option<&str>) -> Result<Signature> {
        let mut input = NamedTempFile::new().map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;
        input.write_all(data).map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;

        let output = self
            .base_command(homedir)
            .arg("--local-user")
            .arg(key_id)
            .arg("--detach-sign")
            .arg("--output")
            .arg("-")
            .arg(input.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Transport(format!("failed to run gpg: {e}")))?;

        if !output.status.success() {
            return Err(Error::Transport(format!(
                "gpg --detach-sign failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }

    fn verify_one(&self, data: &[u8], signature: &Signature) -> Result<bool> {
        let mut data_file = NamedTempFile::new().map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;
        data_file
            .write_all(data)
            .map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;
        let mut sig_file = NamedTempFile::new().map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;
        sig_file
            .write_all(signature)
            .map_err(|e| Error::Transport(format!("gpg tempfile: {e}")))?;

        let status = self
            .base_command(None)
            .arg("--verify")
            .arg(sig_file.path())
            .arg(data_file.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::Transport(format!("failed to run gpg: {e}")))?;
        Ok(status.success())
    }
}
