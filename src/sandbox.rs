//! Per-test private scratch directories.

use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;

/// Errors raised while creating or populating a [`Sandbox`].
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create the scratch directory: {0}")]
    Create(#[source] io::Error),

    #[error("failed to change the working directory: {0}")]
    Chdir(#[source] io::Error),

    #[error("failed to stage `{path}`: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A private scratch directory the current process works inside.
///
/// Creating a sandbox records the directory the test was launched from,
/// creates a fresh temp directory and chdirs into it, so relative paths in
/// the test body never touch the real working tree. Dropping the sandbox
/// restores the original working directory; the scratch directory itself is
/// removed by `tempfile`.
pub struct Sandbox {
    launched_from: PathBuf,
    scratch: TempDir,
}

impl Sandbox {
    pub fn new() -> Result<Self, SandboxError> {
        let launched_from = env::current_dir().map_err(SandboxError::Chdir)?;
        let scratch = tempfile::Builder::new()
            .prefix("cupel")
            .tempdir()
            .map_err(SandboxError::Create)?;
        env::set_current_dir(scratch.path()).map_err(SandboxError::Chdir)?;
        Ok(Self { launched_from, scratch })
    }

    /// Copy a file into the sandbox, keeping its layout: a relative source
    /// (resolved against the launch directory) keeps its relative path, an
    /// absolute source is re-rooted under the sandbox with its root
    /// component stripped.
    pub fn include(&self, path: impl AsRef<Path>) -> Result<(), SandboxError> {
        let path = path.as_ref();
        let (source, dest) = if path.is_relative() {
            (self.launched_from.join(path), path.to_path_buf())
        } else {
            (path.to_path_buf(), strip_root(path))
        };
        self.stage(&source, &dest)
    }

    /// Copy a file into the sandbox at an explicit sandbox-relative
    /// destination.
    pub fn include_as(&self, source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<(), SandboxError> {
        let source = source.as_ref();
        let source = if source.is_relative() {
            self.launched_from.join(source)
        } else {
            source.to_path_buf()
        };
        self.stage(&source, &strip_root(dest.as_ref()))
    }

    /// The scratch directory itself.
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    fn stage(&self, source: &Path, dest: &Path) -> Result<(), SandboxError> {
        let target = self.scratch.path().join(dest);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| SandboxError::Stage {
                path: dest.to_path_buf(),
                source: e,
            })?;
        }
        fs::copy(source, &target).map_err(|e| SandboxError::Stage {
            path: source.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // Leave the scratch directory before tempfile deletes it; a failed
        // restore must not mask the test's own result.
        let _ = env::set_current_dir(&self.launched_from);
    }
}

/// Make a path joinable under the sandbox root by dropping root and
/// drive-prefix components.
fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}
