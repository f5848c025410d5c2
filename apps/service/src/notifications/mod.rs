/// Alert delivery: throttle, rendering and transports
pub mod mailer;
pub mod system;
pub mod templates;
pub mod throttle;

pub use mailer::{DisabledMailer, MailError, Mailer, OutgoingEmail, mailer_from_config};
pub use system::{LogAlert, SystemAlert};
pub use throttle::can_send;

use chrono::Utc;

use crate::database::Job;
use crate::monitoring::history::FailureRecord;
use templates::RenderedEmail;

/// Best-effort alert emails.
///
/// Every error is logged and reported as `false`; nothing here fails the
/// caller.
pub struct Notifier {
    mailer: Box<dyn Mailer>,
}

impl Notifier {
    pub fn new(mailer: Box<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub async fn send_failure(&self, job: &Job, history: &[FailureRecord]) -> bool {
        let rendered = templates::failure_email(job, history, Utc::now());
        self.deliver(job, "failure", rendered).await
    }

    pub async fn send_recovery(&self, job: &Job, downtime: &str) -> bool {
        let rendered = templates::recovery_email(job, downtime, Utc::now());
        self.deliver(job, "recovery", rendered).await
    }

    async fn deliver(&self, job: &Job, kind: &str, rendered: tera::Result<RenderedEmail>) -> bool {
        let Some(to) = job.alert_email.as_deref() else {
            tracing::warn!("No alert email configured for job {}, skipping {} email", job.id, kind);
            return false;
        };

        let result = match rendered {
            Ok(rendered) => {
                let email = OutgoingEmail {
                    to: to.to_string(),
                    subject: rendered.subject,
                    text: rendered.text,
                    html: rendered.html,
                };
                self.mailer.send(&email).await
            }
            Err(e) => Err(MailError::from(e)),
        };

        match result {
            Ok(()) => {
                tracing::info!("Sent {} email for job {} to {}", kind, job.id, to);
                true
            }
            Err(MailError::NotConfigured) => {
                tracing::warn!("Email not configured, skipping {} email for job {}", kind, job.id);
                false
            }
            Err(e) => {
                tracing::error!("Failed to send {} email for job {}: {}", kind, job.id, e);
                false
            }
        }
    }
}
