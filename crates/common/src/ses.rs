use async_trait::async_trait;
use aws_sdk_sesv2::{
    config::{BehaviorVersion, Credentials, Region},
    error::BuildError,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use derive_more::{Display, Error, From};

use crate::config;

/// Charset used for every part of an outgoing email.
const CHARSET: &str = "UTF-8";

/// Mail delivery errors.
#[derive(Debug, Display, From, Error)]
pub enum MailError {
    /// SES service or transport error.
    Ses(aws_sdk_sesv2::Error),

    /// Unable to construct SES request.
    Build(BuildError),
}

/// A single outgoing HTML email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    /// Sender address.
    pub from: String,

    /// Recipient addresses.
    pub to: Vec<String>,

    /// Subject line.
    pub subject: String,

    /// HTML body.
    pub html_body: String,
}

/// Email delivery service.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the provided email once.
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Amazon SES-backed [`Mailer`].
pub struct SesMailer {
    client: Client,
}

impl SesMailer {
    /// Create new [`SesMailer`] using deployment credentials.
    ///
    /// Mail region falls back to the storage region if the
    /// notification configuration doesn't specify its own.
    pub async fn new(
        notification: &config::Notification,
        storage: &config::Storage,
        target: &config::Target,
    ) -> SesMailer {
        let region = notification
            .region
            .clone()
            .unwrap_or_else(|| storage.region.clone());

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                &target.access_key_id,
                &target.secret_access_key,
                None,
                None,
                "webgl-deploy",
            ))
            .load()
            .await;

        SesMailer {
            client: Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.client
            .send_email()
            .from_email_address(&email.from)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(email.to.clone()))
                    .build(),
            )
            .content(email_content(email)?)
            .send()
            .await
            .map_err(aws_sdk_sesv2::Error::from)?;

        Ok(())
    }
}

/// Build a simple HTML message with UTF-8 encoded subject and body.
fn email_content(email: &Email) -> Result<EmailContent, BuildError> {
    let subject = Content::builder()
        .data(&email.subject)
        .charset(CHARSET)
        .build()?;

    let html = Content::builder()
        .data(&email.html_body)
        .charset(CHARSET)
        .build()?;

    let message = Message::builder()
        .subject(subject)
        .body(Body::builder().html(html).build())
        .build();

    Ok(EmailContent::builder().simple(message).build())
}
