//! # Staging
//!
//! Unity WebGL exports keep their gzip-compressed build artifacts in a `Compressed`
//! directory, with a `gz` suffix appended to every file name. Before the upload
//! we build a `sync` directory inside the export, which mirrors the bucket layout:
//!
//! ```text
//! sync/
//! ├── index.html
//! └── Release/
//!     ├── game.wasm   (copied from Compressed/game.wasmgz, still gzip-compressed)
//!     └── ...
//! ```
//!
//! Only names are changed during staging, file contents are copied byte-for-byte.
//! The staging directory is always rebuilt from scratch.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use derive_more::{Display, Error};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Name of the staging directory, relative to the export directory.
pub(crate) const SYNC_DIR: &str = "sync";

/// Name of the staged release directory, which is also used as a bucket prefix.
pub(crate) const RELEASE_DIR: &str = "Release";

/// Entry page of the WebGL build.
pub(crate) const INDEX_FILE: &str = "index.html";

/// Directory with compressed build artifacts produced by Unity.
const COMPRESSED_DIR: &str = "Compressed";

/// Suffix stripped from compressed artifact names.
const COMPRESSED_SUFFIX: &str = "gz";

/// Staging errors.
///
/// Staging is not transactional, a failure leaves the
/// partially built staging directory as is.
#[derive(Debug, Display, Error)]
pub(crate) enum StageError {
    /// Unable to list compressed artifacts.
    #[display(fmt = "unable to read {}: {}", "path.display()", source)]
    Enumerate {
        /// Compressed artifacts directory.
        path: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Unable to remove a staging directory left from a previous run.
    #[display(fmt = "unable to remove {}: {}", "path.display()", source)]
    Clear {
        /// Staging directory.
        path: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Unable to create staging directories.
    #[display(fmt = "unable to create {}: {}", "path.display()", source)]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Unable to copy a file into the staging directory.
    #[display(fmt = "unable to copy {} to {}: {}", "from.display()", "to.display()", source)]
    Copy {
        /// Source file.
        from: PathBuf,

        /// Destination inside the staging directory.
        to: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },
}

/// Paths of a freshly built staging directory.
#[derive(Debug)]
pub(crate) struct StagedDeployment {
    /// Staging directory root.
    pub root: PathBuf,

    /// Staged entry page.
    pub index: PathBuf,

    /// Staged release directory.
    pub release: PathBuf,
}

/// Map a compressed artifact name to its staged name.
///
/// Exactly one trailing `gz` is removed, regardless of whether it
/// is preceded by a dot. Other names are kept as is.
pub(crate) fn target_name(name: &str) -> &str {
    name.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(name)
}

/// Build the staging directory inside the provided export directory.
pub(crate) fn stage(source: &Path) -> Result<StagedDeployment, StageError> {
    let compressed_dir = source.join(COMPRESSED_DIR);
    let artifacts = list_compressed_artifacts(&compressed_dir).map_err(|source| {
        StageError::Enumerate {
            path: compressed_dir.clone(),
            source,
        }
    })?;

    let root = source.join(SYNC_DIR);
    let release = root.join(RELEASE_DIR);
    let index = root.join(INDEX_FILE);

    remove_dir_recursive(&root).map_err(|source| StageError::Clear {
        path: root.clone(),
        source,
    })?;

    for dir in [&root, &release] {
        fs::create_dir(dir).map_err(|source| StageError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }

    copy_file(&source.join(INDEX_FILE), &index)?;

    for (path, name) in &artifacts {
        copy_file(path, &release.join(target_name(name)))?;
    }

    info!(artifacts = artifacts.len(), "staged {}", root.display());

    Ok(StagedDeployment {
        root,
        index,
        release,
    })
}

/// Recursively remove the directory, deleting its contents first.
///
/// Missing directory is not an error. Symbolic links are removed,
/// but never followed, including a link in place of the directory itself.
pub(crate) fn remove_dir_recursive(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !metadata.is_dir() {
        return fs::remove_file(path);
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry?;

        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}

/// List entries directly inside of the compressed artifacts directory.
///
/// Mirrors a `*` wildcard match: hidden entries are not matched.
/// Nested directories are skipped, since artifacts are never nested.
fn list_compressed_artifacts(dir: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            warn!("file {} contains non-unicode symbols in path", path.display());
            continue;
        };

        if name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            warn!("skipping nested directory {}", path.display());
            continue;
        }

        let name = String::from(name);
        artifacts.push((path, name));
    }

    artifacts.sort_by(|(_, a), (_, b)| a.cmp(b));

    Ok(artifacts)
}

/// Copy a single file, keeping both paths in the error.
fn copy_file(from: &Path, to: &Path) -> Result<(), StageError> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|source| StageError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
}
