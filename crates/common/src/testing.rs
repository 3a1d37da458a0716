//! In-memory doubles for remote services, used by unit tests.

use std::{
    collections::BTreeMap,
    fs, io,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    s3::{ObjectOptions, ObjectStore, StorageError},
    ses::{Email, MailError, Mailer},
};

/// Operation recorded by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    /// Keys listed under a prefix.
    List(String),

    /// Keys deleted in a single request.
    Delete(Vec<String>),

    /// File uploaded under a key.
    Put(String),
}

/// Object stored in [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents.
    pub body: Vec<u8>,

    /// Options provided during upload.
    pub options: ObjectOptions,
}

/// Predicate that decides whether a call should fail.
type FailurePredicate = Box<dyn Fn(&Call) -> bool + Send + Sync>;

/// In-memory [`ObjectStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<Call>>,
    fail_when: Option<FailurePredicate>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store, which rejects calls matching the provided predicate.
    ///
    /// Rejected calls are still recorded, but do not modify stored objects.
    pub fn failing<F>(predicate: F) -> Self
    where
        F: Fn(&Call) -> bool + Send + Sync + 'static,
    {
        Self {
            fail_when: Some(Box::new(predicate)),
            ..Self::default()
        }
    }

    /// Insert an object directly, bypassing the call log.
    pub fn insert(&self, key: &str, body: &[u8]) {
        lock(&self.objects).insert(
            String::from(key),
            StoredObject {
                body: body.to_vec(),
                options: ObjectOptions::default(),
            },
        );
    }

    /// Snapshot of all stored objects.
    pub fn objects(&self) -> BTreeMap<String, StoredObject> {
        lock(&self.objects).clone()
    }

    /// Snapshot of all recorded calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Record the call and check if it should be rejected.
    fn record(&self, call: Call) -> Result<(), StorageError> {
        let rejected = self.fail_when.as_ref().is_some_and(|fail| fail(&call));

        lock(&self.calls).push(call);

        if rejected {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected failure",
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.record(Call::List(String::from(prefix)))?;

        Ok(lock(&self.objects)
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError> {
        self.record(Call::Delete(keys.to_vec()))?;

        let mut objects = lock(&self.objects);

        for key in keys {
            objects.remove(key);
        }

        Ok(())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        options: &ObjectOptions,
    ) -> Result<(), StorageError> {
        self.record(Call::Put(String::from(key)))?;

        let body = fs::read(path)?;

        lock(&self.objects).insert(
            String::from(key),
            StoredObject {
                body,
                options: options.clone(),
            },
        );

        Ok(())
    }
}

/// [`Mailer`] implementation that records sent emails.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    fail: bool,
}

impl RecordingMailer {
    /// Create a mailer that accepts every email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailer that rejects every email.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Emails sent so far.
    pub fn sent(&self) -> Vec<Email> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Build(
                aws_sdk_sesv2::error::BuildError::other("injected failure"),
            ));
        }

        lock(&self.sent).push(email.clone());

        Ok(())
    }
}

/// Lock a mutex, ignoring poisoning caused by a panicked test thread.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|error| error.into_inner())
}
