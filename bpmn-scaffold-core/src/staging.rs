//! All-or-nothing multi-file writes.
//!
//! A [`ChangeSet`] collects the full new content of every file an entity
//! touches. `commit` stages each one in a temp file beside its target, then
//! renames them into place. If a rename fails, targets already replaced are
//! restored from their snapshots.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, ScaffoldError};

#[derive(Debug)]
pub struct ChangeSet {
    root: PathBuf,
    writes: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

struct Staged {
    target: PathBuf,
    temp: NamedTempFile,
    original: Option<Vec<u8>>,
}

impl ChangeSet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Vec::new(),
        }
    }

    /// Queue `content` for `relative`, replacing any earlier queued write.
    pub fn write(&mut self, relative: impl Into<PathBuf>, content: String) {
        let relative = relative.into();
        match self.writes.iter_mut().find(|(p, _)| *p == relative) {
            Some(entry) => entry.1 = content,
            None => self.writes.push((relative, content)),
        }
    }

    /// Current content of `relative` as this change set sees it: the queued
    /// write if any, otherwise the file on disk. `None` if neither exists.
    pub fn read(&self, relative: &Path) -> Result<Option<String>> {
        if let Some((_, content)) = self.writes.iter().find(|(p, _)| p == relative) {
            return Ok(Some(content.clone()));
        }
        let full = self.root.join(relative);
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScaffoldError::io(full, e)),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.writes.iter().map(|(p, _)| p.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Write every queued file, or none of them.
    pub fn commit(self) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        let mut staged = Vec::with_capacity(self.writes.len());

        for (relative, content) in &self.writes {
            let target = self.root.join(relative);
            let original = snapshot(&target)?;
            if original.as_deref() == Some(content.as_bytes()) {
                summary.unchanged.push(relative.clone());
                continue;
            }

            let parent = target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            std::fs::create_dir_all(&parent).map_err(|e| ScaffoldError::io(&parent, e))?;

            let mut temp = NamedTempFile::new_in(&parent).map_err(|e| ScaffoldError::io(&parent, e))?;
            temp.write_all(content.as_bytes())
                .and_then(|_| temp.flush())
                .map_err(|e| ScaffoldError::io(temp.path(), e))?;

            staged.push(Staged {
                target,
                temp,
                original,
            });
            summary.written.push(relative.clone());
        }

        let mut published: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(staged.len());
        for item in staged {
            match item.temp.persist(&item.target) {
                Ok(_) => {
                    debug!(path = %item.target.display(), "Wrote file");
                    published.push((item.target, item.original));
                }
                Err(err) => {
                    rollback(&published);
                    return Err(ScaffoldError::io(&item.target, err.error));
                }
            }
        }

        Ok(summary)
    }
}

fn snapshot(target: &Path) -> Result<Option<Vec<u8>>> {
    if !target.is_file() {
        return Ok(None);
    }
    std::fs::read(target)
        .map(Some)
        .map_err(|e| ScaffoldError::io(target, e))
}

fn rollback(published: &[(PathBuf, Option<Vec<u8>>)]) {
    for (target, original) in published.iter().rev() {
        let restored = match original {
            Some(bytes) => std::fs::write(target, bytes),
            None => std::fs::remove_file(target),
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), error = %e, "Failed to restore file during rollback");
        }
    }
}
