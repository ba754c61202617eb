use crate::error::{Result, SessionError};
use std::path::{Path, PathBuf};

/// Where clips are written for the duration of their playback.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write(&self, clip_id: u64, payload: &[u8]) -> Result<ScratchFile> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            SessionError::Playback(format!(
                "failed to create scratch dir '{}': {}",
                self.root.display(),
                e
            ))
        })?;
        let path = self
            .root
            .join(format!("clip_{}_{}_{}.wav", std::process::id(), now_ms(), clip_id));
        // Guard first so a failed write still cleans up a partial file.
        let file = ScratchFile {
            path,
            released: false,
        };
        tokio::fs::write(&file.path, payload).await.map_err(|e| {
            SessionError::Playback(format!(
                "failed to write scratch file '{}': {}",
                file.path.display(),
                e
            ))
        })?;
        Ok(file)
    }
}

/// One clip on disk. `release` deletes it; if that never runs (the owning
/// task was cancelled mid-play) dropping the guard deletes it instead.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    released: bool,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "[playback] failed to delete scratch file '{}': {}",
                    self.path.display(),
                    e
                );
            }
        }
        self.released = true;
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("playback"));
        let file = scratch.write(1, b"RIFF").await.unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
        file.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_unreleased_guard_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let file = scratch.write(2, b"data").await.unwrap();
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }
}
