use std::path::PathBuf;

use clap::Parser;

/// Deploy a Unity WebGL export directory to an S3 bucket.
#[derive(Parser)]
#[command(about, version)]
pub(crate) struct Cli {
    /// Folder exported by Unity, containing `index.html` and a `Compressed` folder.
    #[arg(long)]
    pub src: PathBuf,

    /// S3 bucket to deploy the folder to.
    #[arg(long)]
    pub bucket: String,

    /// AWS access key.
    #[arg(long)]
    pub key: String,

    /// AWS access secret.
    #[arg(long)]
    pub secret: String,

    /// Configuration file path.
    #[arg(short, long, default_value = "Deploy.toml")]
    pub config: Option<PathBuf>,

    /// Skip the completion email, even if notifications are configured.
    #[arg(long)]
    pub no_notify: bool,
}
