use std::io::{Cursor, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;
use zip::ZipArchive;

use crate::config::CompilationSettings;
use crate::core::error::EngineError;

// the restricted identity may traverse the root but not list other attempts
const WORK_ROOT_MODE: u32 = 0o711;
// and must be able to enter and read its own attempt
const ATTEMPT_MODE: u32 = 0o755;

/// Private working directory of one execution attempt.
///
/// Directories are never shared: each one is named by a fresh uuid. Removal
/// is left to housekeeping outside the engine.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub async fn create(work_root: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(work_root)
            .await
            .map_err(|source| EngineError::Workspace {
                path: work_root.to_path_buf(),
                source,
            })?;
        fs::set_permissions(work_root, std::fs::Permissions::from_mode(WORK_ROOT_MODE))
            .await
            .map_err(|source| EngineError::Workspace {
                path: work_root.to_path_buf(),
                source,
            })?;

        let path = work_root.join(format!("attempt_{}", Uuid::new_v4()));
        fs::create_dir(&path)
            .await
            .map_err(|source| EngineError::Workspace {
                path: path.clone(),
                source,
            })?;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(ATTEMPT_MODE))
            .await
            .map_err(|source| EngineError::Workspace {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Created workspace {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, EngineError> {
        let path = self.file(name);
        fs::write(&path, contents)
            .await
            .map_err(|source| EngineError::Workspace {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    pub async fn remove_file(&self, path: &Path) -> Result<(), EngineError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EngineError::Workspace {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Unpacks a zip archive into `dir` (relative to the workspace), within
    /// the archive caps of `limits`.
    ///
    /// The outer `Err` is an I/O failure of the host; the inner one describes
    /// what is wrong with the archive and is the submitter's fault.
    pub async fn unpack_zip(
        &self,
        dir: &str,
        bytes: Vec<u8>,
        limits: &CompilationSettings,
    ) -> Result<Result<PathBuf, String>, EngineError> {
        let target = self.file(dir);
        let unpack_target = target.clone();
        let (max_bytes, max_entries) = (limits.max_archive_bytes, limits.max_archive_entries);

        let unpacked = tokio::task::spawn_blocking(move || {
            unpack(&unpack_target, bytes, max_bytes, max_entries)
        })
            .await
            .map_err(|e| EngineError::Workspace {
                path: target.clone(),
                source: std::io::Error::other(e),
            })?;

        match unpacked {
            Ok(Ok(())) => Ok(Ok(target)),
            Ok(Err(reason)) => Ok(Err(reason)),
            Err(source) => Err(EngineError::Workspace {
                path: target,
                source,
            }),
        }
    }
}

fn unpack(
    target: &Path,
    bytes: Vec<u8>,
    max_bytes: u64,
    max_entries: usize,
) -> std::io::Result<Result<(), String>> {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(e) => return Ok(Err(format!("Submission is not a valid zip archive: {}", e))),
    };
    if archive.len() > max_entries {
        return Ok(Err(format!(
            "Archive has {} entries, at most {} are allowed",
            archive.len(),
            max_entries
        )));
    }
    std::fs::create_dir_all(target)?;

    let too_large = || format!("Archive unpacks to more than {} bytes", max_bytes);
    let mut remaining = max_bytes;

    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => return Ok(Err(format!("Failed to read archive entry {}: {}", i, e))),
        };

        let Some(relative) = file.enclosed_name() else {
            return Ok(Err(format!(
                "Archive entry {} points outside of the project",
                file.name()
            )));
        };
        let outpath = target.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // declared sizes are only a hint, the copy below is capped regardless
        if file.size() > remaining {
            return Ok(Err(too_large()));
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        let mut capped = (&mut file).take(remaining.saturating_add(1));
        let copied = std::io::copy(&mut capped, &mut outfile);
        let copied = match copied {
            Ok(copied) => copied,
            Err(e) => return Ok(Err(format!("Failed to extract {}: {}", file.name(), e))),
        };
        if copied > remaining {
            return Ok(Err(too_large()));
        }
        remaining -= copied;
    }

    Ok(Ok(()))
}
