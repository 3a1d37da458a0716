pub mod config;

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "ses")]
pub mod ses;

#[cfg(feature = "test-utils")]
pub mod testing;
