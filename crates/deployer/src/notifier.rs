use common::{
    config::Notification,
    ses::{Email, Mailer},
};
use tracing::{error, info};

use crate::stager::INDEX_FILE;

/// Public URL of the deployed entry page.
pub(crate) fn public_index_url(public_url: &str, bucket: &str) -> String {
    format!("{}/{bucket}/{INDEX_FILE}", public_url.trim_end_matches('/'))
}

/// Build the deployment completion email.
pub(crate) fn deployment_email(config: &Notification, bucket: &str, url: &str) -> Email {
    Email {
        from: config.from.clone(),
        to: config.to.clone(),
        subject: config.subject.clone(),
        html_body: format!(
            "<p>A new build was deployed to the <b>{bucket}</b> bucket.</p>\
             <p><a href=\"{url}\">{url}</a></p>"
        ),
    }
}

/// Send the email once.
///
/// Delivery failures are logged and never propagated, since
/// the deployment itself is already complete at this point.
pub(crate) async fn notify(mailer: &dyn Mailer, email: &Email) {
    match mailer.send(email).await {
        Ok(()) => info!(to = ?email.to, "deployment notification sent"),
        Err(e) => error!(%e, "unable to send deployment notification"),
    }
}
