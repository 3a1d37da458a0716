use std::{io, path::Path, time::Duration};

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{retry::RetryConfig, BehaviorVersion, Credentials, Region},
    error::BuildError,
    primitives::{ByteStream, ByteStreamError},
    types::{Delete, ObjectCannedAcl, ObjectIdentifier},
    Client,
};
use derive_more::{Display, Error, From};

use crate::config;

/// Max count of keys accepted by a single `DeleteObjects` request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Object storage errors.
#[derive(Debug, Display, From, Error)]
pub enum StorageError {
    /// S3 service or transport error.
    S3(aws_sdk_s3::Error),

    /// Unable to construct S3 request.
    Build(BuildError),

    /// Unable to read the uploaded file body.
    ByteStream(ByteStreamError),

    /// IO-related error.
    Io(io::Error),

    /// Bucket refused to delete an object.
    #[from(ignore)]
    #[display(fmt = "unable to delete {}: {}", key, message)]
    DeleteRejected {
        /// Object key.
        key: String,

        /// Error message reported by the bucket.
        message: String,
    },
}

/// Options applied to an uploaded object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    /// Make the object readable by anyone.
    pub public_read: bool,

    /// `Content-Encoding` header value.
    pub content_encoding: Option<String>,

    /// `Content-Type` header value.
    pub content_type: Option<String>,
}

/// Bucket operations used by the deployment process.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List all object keys that begin with the provided prefix.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete objects with the provided keys.
    ///
    /// Deleting keys that do not exist is not an error.
    async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError>;

    /// Upload a local file under the provided key.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        options: &ObjectOptions,
    ) -> Result<(), StorageError>;
}

/// Configured S3 client bound to a single deployment bucket.
pub struct ConfiguredClient {
    bucket: String,
    client: Client,
}

impl ConfiguredClient {
    /// Create new [`ConfiguredClient`] from the provided [`Storage`] configuration.
    ///
    /// Retries are delegated to the SDK: each request is attempted
    /// `retry_count + 1` times with a fixed delay in between.
    ///
    /// [`Storage`]: config::Storage
    pub async fn new(
        storage: &config::Storage,
        transfer: &config::Transfer,
        target: &config::Target,
    ) -> ConfiguredClient {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(Credentials::new(
                &target.access_key_id,
                &target.secret_access_key,
                None,
                None,
                "webgl-deploy",
            ))
            .retry_config(retry_config(transfer));

        if let Some(endpoint_url) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.force_path_style)
            .build();

        ConfiguredClient {
            bucket: target.bucket.clone(),
            client: Client::from_conf(s3_config),
        }
    }
}

/// Retry policy with `retry_count` retries spaced by a fixed delay.
///
/// A static exponential base disables jitter, and capping the backoff
/// at its initial value keeps it from growing between attempts.
fn retry_config(transfer: &config::Transfer) -> RetryConfig {
    let retry_delay = Duration::from_millis(transfer.retry_delay_ms);

    RetryConfig::standard()
        .with_max_attempts(transfer.retry_count + 1)
        .with_initial_backoff(retry_delay)
        .with_max_backoff(retry_delay)
        .with_use_static_exponential_base(true)
}

#[async_trait]
impl ObjectStore for ConfiguredClient {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(aws_sdk_s3::Error::from)?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(String::from),
            );

            // Continuation token is only returned for truncated listings.
            match page.next_continuation_token() {
                Some(token) => continuation_token = Some(String::from(token)),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(
                    Delete::builder()
                        .set_objects(Some(objects))
                        .quiet(true)
                        .build()?,
                )
                .send()
                .await
                .map_err(aws_sdk_s3::Error::from)?;

            if let Some(error) = output.errors().first() {
                return Err(StorageError::DeleteRejected {
                    key: error.key().unwrap_or_default().to_owned(),
                    message: error.message().unwrap_or_default().to_owned(),
                });
            }
        }

        Ok(())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        options: &ObjectOptions,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from_path(path).await?)
            .set_content_encoding(options.content_encoding.clone())
            .set_content_type(options.content_type.clone());

        if options.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(aws_sdk_s3::Error::from)?;

        Ok(())
    }
}
