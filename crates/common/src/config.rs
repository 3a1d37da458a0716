use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

#[cfg(feature = "logging")]
use tracing_subscriber::filter::LevelFilter;

/// Implementation of [`serde`]'s deserializer for [`FromStr`] types.
///
/// [`FromStr`]: std::str::FromStr
#[cfg(feature = "logging")]
fn deserialize_from_str<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error,
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
}

/// Logging configuration.
#[cfg(feature = "logging")]
#[derive(Deserialize)]
pub struct Logging {
    /// Log level.
    #[serde(deserialize_with = "deserialize_from_str")]
    pub level: LevelFilter,
}

#[cfg(feature = "logging")]
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// AWS S3-compatible storage configuration.
///
/// Bucket name and credentials are not part of this section,
/// they are passed on the command line for each deployment (see [`Target`]).
#[derive(Deserialize)]
pub struct Storage {
    /// S3 region name.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3 endpoint URL, used with S3-compatible storage providers.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Address buckets by path instead of a virtual host name.
    #[serde(default)]
    pub force_path_style: bool,

    /// Base URL under which bucket objects are publicly reachable.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_url: default_public_url(),
        }
    }
}

fn default_region() -> String {
    String::from("us-east-1")
}

fn default_public_url() -> String {
    String::from("https://s3.amazonaws.com")
}

/// Upload transfer configuration.
#[derive(Deserialize)]
pub struct Transfer {
    /// Max count of concurrent file uploads within a single directory upload.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Count of retries for a single failed S3 request.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Delay between S3 request retries, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

// Default values used for transfer configuration.
fn default_max_concurrency() -> usize {
    20
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

/// Deployment notification configuration.
#[derive(Deserialize)]
pub struct Notification {
    /// Sender email address.
    pub from: String,

    /// Recipient email addresses.
    pub to: Vec<String>,

    /// Email subject line.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Mail service region, defaults to the storage region.
    #[serde(default)]
    pub region: Option<String>,
}

fn default_subject() -> String {
    String::from("Deployment Completed")
}

/// Deployment target, which is provided on the command line.
pub struct Target {
    /// Bucket name to deploy to.
    pub bucket: String,

    /// Access key identifier.
    pub access_key_id: String,

    /// Secret access key.
    pub secret_access_key: String,
}

/// General configuration.
#[derive(Deserialize, Default)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: Storage,

    /// Upload transfer configuration.
    #[serde(default)]
    pub transfer: Transfer,

    /// Notification configuration.
    ///
    /// Deployments are silent if this section is missing.
    #[serde(default)]
    pub notification: Option<Notification>,

    /// Logging configuration.
    #[cfg(feature = "logging")]
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Create new config using default configuration file or environment variables.
    ///
    /// Missing configuration file is not an error, in which case every value
    /// is either loaded from the environment or set to its default.
    ///
    /// See [`Env`] for more details on how to use environment variables configuration.
    ///
    /// [`Env`]: figment::providers::Env
    pub fn new(path: Option<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.unwrap_or(PathBuf::from("Deploy.toml"))))
            .merge(Env::prefixed("DEPLOY_").split("__"))
            .extract()
    }
}
