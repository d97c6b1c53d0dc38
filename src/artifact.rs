//! On-disk materialization of an untrusted snippet
//!
//! Every invocation gets its own randomly named directory holding exactly one
//! file. The directory is the unit that gets mounted into the sandbox and the
//! unit that gets deleted afterwards.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

const ARTIFACT_PREFIX: &str = "gomoku-sandbox-";

/// The snippet written to a private temporary directory
///
/// Dropping the artifact deletes it; `remove` does the same but reports
/// failures.
#[derive(Debug)]
pub struct CodeArtifact {
    dir: TempDir,
    file_path: PathBuf,
    id: String,
}

impl CodeArtifact {
    /// Write `code` verbatim to `<new temp dir>/<file_name>`
    pub fn materialize(code: &str, file_name: &str) -> io::Result<Self> {
        Self::materialize_in(&std::env::temp_dir(), code, file_name)
    }

    pub fn materialize_in(base: &Path, code: &str, file_name: &str) -> io::Result<Self> {
        let mut components = Path::new(file_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact name must be a single file name: {:?}", file_name),
            ));
        }

        let dir = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .tempdir_in(base)?;

        let id = dir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_path = dir.path().join(file_name);
        fs::write(&file_path, code)?;

        // The sandboxed user is unprivileged; it must be able to read the
        // mount but nothing else on the host changes
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
            fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644))?;
        }

        debug!("Materialized artifact {} ({} bytes)", id, code.len());

        Ok(Self { dir, file_path, id })
    }

    /// Unique name of this artifact, safe for container and log names
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory to mount into the sandbox
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Delete the artifact directory and everything in it
    pub fn remove(self) -> io::Result<()> {
        let id = self.id;
        self.dir.close()?;
        debug!("Removed artifact {}", id);
        Ok(())
    }
}
