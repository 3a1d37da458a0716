//! # Unity WebGL deployment
//!
//! Deploys a Unity WebGL export directory to an S3 bucket, replacing the previous
//! deployment stored there.
//!
//! # Deployment process
//!
//! The deployment runs as a fixed sequence of steps, each of which begins only after
//! the previous one succeeds:
//!
//! 1. [`stage`] the export into a local `sync` directory,
//! 2. [`clear_index`] and [`clear_release`] to remove the previous deployment,
//! 3. [`publish_index`] and [`publish_release`] to upload the staged files,
//! 4. remove the staging directory,
//! 5. optionally [`notify`] the team by email.
//!
//! Failed steps stop the deployment and exit the process with a non-zero status code.
//! Nothing is rolled back, so re-running the deployment is the way to recover.
//!
//! [`stage`]: stager::stage
//! [`clear_index`]: remote::clear_index
//! [`clear_release`]: remote::clear_release
//! [`publish_index`]: remote::publish_index
//! [`publish_release`]: remote::publish_release
//! [`notify`]: notifier::notify
//!
//! # Configuration
//!
//! Bucket name and credentials are passed on the command line. Optional settings,
//! such as storage region, upload concurrency and notification recipients are loaded
//! from the `Deploy.toml` file and `DEPLOY_`-prefixed environment variables.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

/// CLI configuration.
mod cli;

/// Deployment completion emails.
mod notifier;

/// Remote bucket clearing and publishing.
mod remote;

/// Local staging directory management.
mod stager;

/// Deployment step sequencing.
mod workflow;

use clap::Parser;
use cli::Cli;
use common::{
    config::{Config, Target},
    logging,
    s3::ConfiguredClient,
    ses::SesMailer,
};
use tracing::{error, info};
use workflow::{NotificationTarget, Workflow};

/// Deployment entrypoint.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let config = Config::new(cli.config)?;

    logging::init(&config);

    let target = Target {
        bucket: cli.bucket,
        access_key_id: cli.key,
        secret_access_key: cli.secret,
    };

    info!(
        key = %target.access_key_id,
        "deploying {} to {}",
        cli.src.display(),
        target.bucket
    );

    let store = ConfiguredClient::new(&config.storage, &config.transfer, &target).await;

    let notification = match &config.notification {
        Some(notification) if !cli.no_notify => Some((
            SesMailer::new(notification, &config.storage, &target).await,
            notification,
        )),
        _ => None,
    };

    let workflow = Workflow {
        store: &store,
        bucket: &target.bucket,
        storage: &config.storage,
        transfer: &config.transfer,
        notification: notification
            .as_ref()
            .map(|(mailer, config)| NotificationTarget { mailer, config }),
    };

    if let Err(e) = workflow.run(&cli.src).await {
        error!(%e, "deployment failed");
        return Err(e.into());
    }

    Ok(())
}
