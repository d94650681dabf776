use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use super::DownloadError;

/// Removes the temporary file on drop unless the rename went through.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(dir: &Path) -> Self {
        let suffix: u64 = rand::random();
        Self {
            path: dir.join(format!(".heist-{suffix:016x}.part")),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            // Best effort; the file may never have been created.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Writes `body` to `dir/filename`, creating `dir` if needed.
///
/// The bytes land in a hidden sibling first and are renamed over the target,
/// so readers only ever see a complete file and an existing file of the same
/// name is replaced.
pub(super) async fn save_atomically(
    dir: &Path,
    filename: &str,
    body: &[u8],
) -> Result<PathBuf, DownloadError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))?;

    let target = dir.join(filename);
    let mut part = PartFile::new(dir);

    fs::write(&part.path, body)
        .await
        .map_err(|e| DownloadError::io(&part.path, e))?;
    fs::rename(&part.path, &target)
        .await
        .map_err(|e| DownloadError::io(&target, e))?;
    part.disarm();

    debug!(path = %target.display(), bytes = body.len(), "file written");
    Ok(target)
}
