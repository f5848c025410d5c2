use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::Smtp;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("email transport is not configured")]
    NotConfigured,
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("templating error: {0}")]
    Template(#[from] tera::Error),
}

/// A fully rendered email ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Outbound mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP relay mailer
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a mailer from config, `NotConfigured` when credentials are missing
    pub fn from_config(smtp: &Smtp) -> Result<Self, MailError> {
        let (username, password) = smtp.credentials().ok_or(MailError::NotConfigured)?;
        let from: Mailbox = smtp.sender().unwrap_or(username).parse()?;

        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
        };

        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(username.to_owned(), password.to_owned()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(email.text.clone(), email.html.clone()))?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Mailer used when no SMTP credentials are configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

/// SMTP mailer when configured, otherwise a disabled one
pub fn mailer_from_config(smtp: &Smtp) -> Box<dyn Mailer> {
    match SmtpMailer::from_config(smtp) {
        Ok(mailer) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "email transport initialized");
            Box::new(mailer)
        }
        Err(MailError::NotConfigured) => {
            tracing::warn!("email credentials not configured, email notifications are disabled");
            Box::new(DisabledMailer)
        }
        Err(e) => {
            tracing::error!("invalid email configuration, email notifications are disabled: {}", e);
            Box::new(DisabledMailer)
        }
    }
}
