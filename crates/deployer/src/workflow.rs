//! # Workflow
//!
//! A deployment is a fixed, linear sequence of [`Step`]s. Staging runs synchronously,
//! while every remote step is awaited to completion before the next one begins.
//! There are no retries on this level, retry policy belongs to the S3 client.

use std::{future::Future, io, path::Path};

use common::{
    config::{Notification, Storage, Transfer},
    s3::{ObjectStore, StorageError},
    ses::Mailer,
};
use derive_more::{Display, Error, From};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, instrument};

use crate::{notifier, remote, stager};

/// Deployment workflow steps, in execution order.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub(crate) enum Step {
    /// Build the local staging directory.
    #[display(fmt = "stage")]
    Stage,

    /// Delete the remote entry page.
    #[display(fmt = "clear index")]
    ClearIndex,

    /// Delete remote release artifacts.
    #[display(fmt = "clear release")]
    ClearRelease,

    /// Upload the staged entry page.
    #[display(fmt = "publish index")]
    PublishIndex,

    /// Upload staged release artifacts.
    #[display(fmt = "publish release")]
    PublishRelease,

    /// Remove the staging directory.
    #[display(fmt = "cleanup")]
    Cleanup,

    /// Send the completion email.
    #[display(fmt = "notify")]
    Notify,
}

/// Deployment workflow errors.
///
/// Nothing is rolled back: a failure after the clearing steps
/// leaves the bucket partially (or completely) empty.
#[derive(Debug, Display, From, Error)]
pub(crate) enum DeployError {
    /// Unable to build the staging directory.
    #[display(fmt = "unable to stage deployment: {}", _0)]
    Stage(stager::StageError),

    /// Remote bucket operation failed.
    #[from(ignore)]
    #[display(fmt = "{} step failed: {}", step, source)]
    Remote {
        /// Step that failed.
        step: Step,

        /// Underlying storage error.
        source: StorageError,
    },

    /// Unable to remove the staging directory after upload.
    #[display(fmt = "unable to remove staging directory: {}", _0)]
    Cleanup(io::Error),
}

/// Mail service paired with the notification settings.
pub(crate) struct NotificationTarget<'a> {
    /// Mail delivery service.
    pub mailer: &'a dyn Mailer,

    /// Sender, recipients and subject.
    pub config: &'a Notification,
}

/// Single deployment of an export directory to a bucket.
pub(crate) struct Workflow<'a> {
    /// Deployment bucket.
    pub store: &'a dyn ObjectStore,

    /// Bucket name, used in notifications.
    pub bucket: &'a str,

    /// Storage configuration.
    pub storage: &'a Storage,

    /// Upload transfer configuration.
    pub transfer: &'a Transfer,

    /// Deployments without notification target are silent.
    pub notification: Option<NotificationTarget<'a>>,
}

impl Workflow<'_> {
    /// Run every deployment step in order.
    ///
    /// Each step starts only after the previous one succeeds,
    /// the first failure is returned immediately.
    #[instrument(skip_all, fields(bucket = self.bucket))]
    pub(crate) async fn run(&self, source: &Path) -> Result<(), DeployError> {
        info!(step = %Step::Stage, "deploying {}", source.display());
        let staged = stager::stage(source)?;

        self.remote_step(Step::ClearIndex, remote::clear_index(self.store))
            .await?;
        self.remote_step(Step::ClearRelease, remote::clear_release(self.store))
            .await?;

        let progress = upload_progress(Step::PublishIndex);
        self.remote_step(
            Step::PublishIndex,
            remote::publish_index(self.store, &staged, &progress),
        )
        .await?;
        progress.finish();

        let progress = upload_progress(Step::PublishRelease);
        self.remote_step(
            Step::PublishRelease,
            remote::publish_release(
                self.store,
                &staged,
                self.transfer.max_concurrency,
                &progress,
            ),
        )
        .await?;
        progress.finish();

        info!(step = %Step::Cleanup, "removing {}", staged.root.display());
        stager::remove_dir_recursive(&staged.root)?;

        info!("done uploading");

        if let Some(NotificationTarget { mailer, config }) = &self.notification {
            info!(step = %Step::Notify, "sending deployment notification");

            let url = notifier::public_index_url(&self.storage.public_url, self.bucket);
            let email = notifier::deployment_email(config, self.bucket, &url);
            notifier::notify(*mailer, &email).await;
        }

        Ok(())
    }

    /// Await a single remote step, tagging its failure with the step name.
    async fn remote_step<F>(&self, step: Step, operation: F) -> Result<(), DeployError>
    where
        F: Future<Output = Result<(), StorageError>>,
    {
        info!(%step, "started");

        operation
            .await
            .map_err(|source| DeployError::Remote { step, source })?;

        info!(%step, "completed");

        Ok(())
    }
}

/// Byte progress bar for a single upload step.
fn upload_progress(step: Step) -> ProgressBar {
    ProgressBar::new(0)
        .with_style(
            ProgressStyle::with_template("{msg} {bytes}/{total_bytes} [{bar:30}] {eta}")
                .expect("invalid progress bar template")
                .progress_chars("=> "),
        )
        .with_message(step.to_string())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use common::{
        config::{Notification, Storage, Transfer},
        testing::{Call, MemoryStore, RecordingMailer},
    };
    use tempfile::TempDir;

    use super::{DeployError, NotificationTarget, Step, Workflow};

    fn create_export() -> TempDir {
        let dir = tempfile::tempdir().expect("unable to create temporary directory");

        fs::create_dir(dir.path().join("Compressed")).unwrap();
        fs::write(dir.path().join("index.html"), b"A").unwrap();
        fs::write(dir.path().join("Compressed/game.wasmgz"), b"\x1f\x8b").unwrap();

        dir
    }

    fn notification() -> Notification {
        Notification {
            from: String::from("builds@example.com"),
            to: vec![String::from("team@example.com")],
            subject: String::from("Deployment Completed"),
            region: None,
        }
    }

    async fn deploy(
        store: &MemoryStore,
        mailer: Option<&RecordingMailer>,
        source: &Path,
    ) -> Result<(), DeployError> {
        let storage = Storage::default();
        let transfer = Transfer::default();
        let notification = notification();

        Workflow {
            store,
            bucket: "games",
            storage: &storage,
            transfer: &transfer,
            notification: mailer.map(|mailer| NotificationTarget {
                mailer,
                config: &notification,
            }),
        }
        .run(source)
        .await
    }

    #[tokio::test]
    async fn deploys_export() {
        let export = create_export();
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();

        deploy(&store, Some(&mailer), export.path())
            .await
            .expect("unable to deploy");

        let objects = store.objects();
        assert_eq!(
            objects.keys().collect::<Vec<_>>(),
            vec!["Release/game.wasm", "index.html"]
        );

        let index = &objects["index.html"];
        assert_eq!(index.body, b"A");
        assert!(index.options.public_read);

        let wasm = &objects["Release/game.wasm"];
        assert_eq!(wasm.body, b"\x1f\x8b");
        assert!(wasm.options.public_read);
        assert_eq!(wasm.options.content_encoding.as_deref(), Some("gzip"));

        assert!(!export.path().join("sync").exists());

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .html_body
            .contains("https://s3.amazonaws.com/games/index.html"));
    }

    #[tokio::test]
    async fn clears_before_publishing() {
        let export = create_export();
        let store = MemoryStore::new();

        deploy(&store, None, export.path())
            .await
            .expect("unable to deploy");

        assert_eq!(
            store.calls(),
            vec![
                Call::Delete(vec![String::from("index.html")]),
                Call::List(String::from("Release")),
                Call::Delete(Vec::new()),
                Call::Put(String::from("index.html")),
                Call::Put(String::from("Release/game.wasm")),
                Call::List(String::from("Release/")),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_deployment_is_idempotent() {
        let export = create_export();
        let store = MemoryStore::new();

        deploy(&store, None, export.path())
            .await
            .expect("unable to deploy");
        let first = store.objects();

        deploy(&store, None, export.path())
            .await
            .expect("unable to deploy");

        assert_eq!(store.objects(), first);
    }

    #[tokio::test]
    async fn replaces_stale_objects() {
        let export = create_export();
        let store = MemoryStore::new();
        store.insert("index.html", b"old");
        store.insert("Release/old.wasm", b"old");

        deploy(&store, None, export.path())
            .await
            .expect("unable to deploy");

        assert_eq!(
            store.objects().into_keys().collect::<Vec<_>>(),
            vec!["Release/game.wasm", "index.html"]
        );
    }

    #[tokio::test]
    async fn failure_stops_workflow() {
        let export = create_export();
        let store = MemoryStore::failing(|call| *call == Call::Put(String::from("index.html")));
        let mailer = RecordingMailer::new();

        let error = deploy(&store, Some(&mailer), export.path())
            .await
            .expect_err("deployment should fail");

        assert!(matches!(
            error,
            DeployError::Remote {
                step: Step::PublishIndex,
                ..
            }
        ));
        assert!(!store
            .calls()
            .contains(&Call::Put(String::from("Release/game.wasm"))));
        assert!(export.path().join("sync/Release/game.wasm").exists());
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn clearing_failure_skips_publishing() {
        let export = create_export();
        let store = MemoryStore::failing(|call| matches!(call, Call::List(_)));

        let error = deploy(&store, None, export.path())
            .await
            .expect_err("deployment should fail");

        assert!(matches!(
            error,
            DeployError::Remote {
                step: Step::ClearRelease,
                ..
            }
        ));
        assert!(!store
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Put(_))));
    }

    #[tokio::test]
    async fn notification_failure_is_not_fatal() {
        let export = create_export();
        let store = MemoryStore::new();
        let mailer = RecordingMailer::failing();

        deploy(&store, Some(&mailer), export.path())
            .await
            .expect("unable to deploy");

        assert!(!export.path().join("sync").exists());
    }

    #[tokio::test]
    async fn staging_failure_skips_remote_steps() {
        let export = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();

        let error = deploy(&store, None, export.path())
            .await
            .expect_err("deployment should fail");

        assert!(matches!(error, DeployError::Stage(_)));
        assert!(store.calls().is_empty());
    }
}
