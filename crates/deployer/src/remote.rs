//! # Remote bucket operations
//!
//! Each deployment replaces the previous one: the entry page and every object
//! under the `Release` prefix are deleted first, then the staged files are uploaded
//! with public read access.
//!
//! Release artifacts keep their gzip-compressed contents while losing the `gz`
//! name suffix, so they are uploaded with `Content-Encoding: gzip` and browsers
//! decompress them transparently.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use common::s3::{ObjectOptions, ObjectStore, StorageError};
use futures_util::{stream, TryStreamExt};
use indicatif::ProgressBar;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::stager::{StagedDeployment, INDEX_FILE, RELEASE_DIR};

/// Content encoding of every release artifact.
const RELEASE_CONTENT_ENCODING: &str = "gzip";

/// A single staged file scheduled for upload.
struct UploadEntry {
    /// Bucket object key.
    key: String,

    /// Local file path.
    path: PathBuf,

    /// File size, in bytes.
    size: u64,
}

/// Delete the entry page object.
pub(crate) async fn clear_index(store: &dyn ObjectStore) -> Result<(), StorageError> {
    store.delete_keys(&[String::from(INDEX_FILE)]).await
}

/// Delete every object with a key that begins with `Release`.
pub(crate) async fn clear_release(store: &dyn ObjectStore) -> Result<(), StorageError> {
    let keys = store.list_keys(RELEASE_DIR).await?;

    debug!(count = keys.len(), "clearing release objects");

    store.delete_keys(&keys).await
}

/// Upload the staged entry page.
///
/// Only a single key is synchronized here, so there are
/// no removed remote objects to clean up afterwards.
pub(crate) async fn publish_index(
    store: &dyn ObjectStore,
    staged: &StagedDeployment,
    progress: &ProgressBar,
) -> Result<(), StorageError> {
    let size = fs::metadata(&staged.index)?.len();
    progress.set_length(size);

    let options = ObjectOptions {
        public_read: true,
        content_encoding: None,
        content_type: Some(String::from(content_type(INDEX_FILE))),
    };

    store.put_file(INDEX_FILE, &staged.index, &options).await?;
    progress.inc(size);

    Ok(())
}

/// Upload the staged release directory under the `Release/` prefix.
///
/// At most `max_concurrency` files are uploaded at once. After all uploads
/// finish, remote objects under the prefix without a local counterpart are deleted.
pub(crate) async fn publish_release(
    store: &dyn ObjectStore,
    staged: &StagedDeployment,
    max_concurrency: usize,
    progress: &ProgressBar,
) -> Result<(), StorageError> {
    let prefix = format!("{RELEASE_DIR}/");
    let entries = collect_uploads(&staged.release, &prefix)?;

    progress.set_length(entries.iter().map(|entry| entry.size).sum());

    stream::iter(entries.iter().map(Ok::<_, StorageError>))
        .try_for_each_concurrent(max_concurrency.max(1), |entry| async move {
            let options = ObjectOptions {
                public_read: true,
                content_encoding: Some(String::from(RELEASE_CONTENT_ENCODING)),
                content_type: Some(String::from(content_type(&entry.key))),
            };

            store.put_file(&entry.key, &entry.path, &options).await?;
            progress.inc(entry.size);

            Ok(())
        })
        .await?;

    let uploaded = entries
        .iter()
        .map(|entry| entry.key.as_str())
        .collect::<HashSet<_>>();

    let removed = store
        .list_keys(&prefix)
        .await?
        .into_iter()
        .filter(|key| !uploaded.contains(key.as_str()))
        .collect::<Vec<_>>();

    if !removed.is_empty() {
        debug!(count = removed.len(), "deleting removed release objects");
        store.delete_keys(&removed).await?;
    }

    Ok(())
}

/// Recursively collect files inside `dir`, mapping them to `/`-separated keys.
fn collect_uploads(dir: &Path, prefix: &str) -> Result<Vec<UploadEntry>, StorageError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;

        let Some(components) = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
        else {
            warn!("file {} contains non-unicode symbols in path", entry.path().display());
            continue;
        };

        entries.push(UploadEntry {
            key: format!("{prefix}{}", components.join("/")),
            path: entry.path().to_path_buf(),
            size: entry.metadata().map_err(io::Error::from)?.len(),
        });
    }

    Ok(entries)
}

/// Guess the `Content-Type` of a WebGL build file from its name.
///
/// Unity `.data` bundles and unknown extensions are served as binary.
fn content_type(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, extension)| extension);

    match extension {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("json") => "application/json",
        Some("css") => "text/css",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use common::testing::{Call, MemoryStore};
    use indicatif::ProgressBar;
    use tempfile::TempDir;

    use super::{clear_index, clear_release, content_type, publish_index, publish_release};
    use crate::stager::StagedDeployment;

    fn create_staged(files: &[(&str, &[u8])]) -> (TempDir, StagedDeployment) {
        let dir = tempfile::tempdir().expect("unable to create temporary directory");
        let root = dir.path().join("sync");
        let release = root.join("Release");

        fs::create_dir_all(&release).unwrap();
        fs::write(root.join("index.html"), b"A").unwrap();

        for (name, contents) in files {
            let path = release.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        let staged = StagedDeployment {
            index: root.join("index.html"),
            root,
            release,
        };

        (dir, staged)
    }

    fn keys(store: &MemoryStore) -> Vec<String> {
        store.objects().into_keys().collect()
    }

    #[tokio::test]
    async fn clears_index_and_release_prefix() {
        let store = MemoryStore::new();
        store.insert("index.html", b"old");
        store.insert("Release/game.wasm", b"old");
        store.insert("ReleaseNotes.txt", b"old");
        store.insert("favicon.ico", b"keep");

        clear_index(&store).await.expect("unable to clear index");
        clear_release(&store).await.expect("unable to clear release");

        assert_eq!(keys(&store), vec!["favicon.ico"]);
    }

    #[tokio::test]
    async fn clearing_empty_bucket_succeeds() {
        let store = MemoryStore::new();

        clear_index(&store).await.expect("unable to clear index");
        clear_release(&store).await.expect("unable to clear release");

        assert!(store.objects().is_empty());
    }

    #[tokio::test]
    async fn publishes_index_as_public_html() {
        let (_dir, staged) = create_staged(&[]);
        let store = MemoryStore::new();

        publish_index(&store, &staged, &ProgressBar::hidden())
            .await
            .expect("unable to publish index");

        let objects = store.objects();
        let index = &objects["index.html"];

        assert_eq!(index.body, b"A");
        assert!(index.options.public_read);
        assert_eq!(index.options.content_encoding, None);
        assert_eq!(index.options.content_type.as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn publishes_release_with_gzip_encoding() {
        let (_dir, staged) = create_staged(&[
            ("game.wasm", b"\x1f\x8b"),
            ("game.framework.js", b"js"),
            ("nested/extra.data", b"data"),
        ]);
        let store = MemoryStore::new();
        let progress = ProgressBar::hidden();

        publish_release(&store, &staged, 2, &progress)
            .await
            .expect("unable to publish release");

        let objects = store.objects();

        assert_eq!(
            objects.keys().collect::<Vec<_>>(),
            vec![
                "Release/game.framework.js",
                "Release/game.wasm",
                "Release/nested/extra.data"
            ]
        );

        let wasm = &objects["Release/game.wasm"];
        assert_eq!(wasm.body, b"\x1f\x8b");
        assert!(wasm.options.public_read);
        assert_eq!(wasm.options.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(wasm.options.content_type.as_deref(), Some("application/wasm"));

        assert_eq!(progress.position(), 8);
        assert_eq!(progress.length(), Some(8));
    }

    #[tokio::test]
    async fn deletes_removed_release_objects() {
        let (_dir, staged) = create_staged(&[("game.wasm", b"new")]);
        let store = MemoryStore::new();
        store.insert("Release/stale.wasm", b"old");

        publish_release(&store, &staged, 4, &ProgressBar::hidden())
            .await
            .expect("unable to publish release");

        assert_eq!(keys(&store), vec!["Release/game.wasm"]);
        assert!(store
            .calls()
            .contains(&Call::Delete(vec![String::from("Release/stale.wasm")])));
    }

    #[tokio::test]
    async fn stops_on_upload_failure() {
        let (_dir, staged) = create_staged(&[("game.wasm", b"B")]);
        let store = MemoryStore::failing(|call| matches!(call, Call::Put(_)));

        let result = publish_release(&store, &staged, 1, &ProgressBar::hidden()).await;

        assert!(result.is_err());
        assert!(!store.calls().iter().any(|call| matches!(call, Call::List(_))));
    }

    #[test]
    fn guesses_content_types() {
        assert_eq!(content_type("index.html"), "text/html");
        assert_eq!(content_type("Release/game.loader.js"), "application/javascript");
        assert_eq!(content_type("Release/game.wasm"), "application/wasm");
        assert_eq!(content_type("Release/game.data"), "application/octet-stream");
        assert_eq!(content_type("Release/game.wasm."), "application/octet-stream");
        assert_eq!(content_type("README"), "application/octet-stream");
    }
}
