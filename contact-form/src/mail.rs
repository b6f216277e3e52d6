use crate::config::{MailConfig, SmtpTls};
use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const SUBJECT_PREFIX: &str = "Hello: ";

#[async_trait]
pub trait ContactMailer: Send + Sync {
    async fn send(&self, subject: &str, name: &str, email: &str, body: &str)
        -> Result<(), MailError>;
}

/// Relays contact messages to a fixed recipient through an SMTP server.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let from = parse_mailbox(&config.sender)?;
        let to = parse_mailbox(&config.recipient)?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(Self::tls(config)?)
            .timeout(Some(config.timeout))
            .authentication(vec![Mechanism::Plain]);
        if let Some(password) = config.password.as_ref() {
            builder = builder.credentials(Credentials::new(
                config.sender.clone(),
                password.clone(),
            ));
        }
        info!(
            "Relaying mail through {}:{} ({:?})",
            config.host, config.port, config.tls
        );
        Ok(Self {
            transport: builder.build(),
            from,
            to,
            timeout: config.timeout,
        })
    }

    fn tls(config: &MailConfig) -> Result<Tls, MailError> {
        let parameters = || TlsParameters::new(config.host.clone()).map_err(MailError::Transport);
        Ok(match config.tls {
            SmtpTls::None => Tls::None,
            SmtpTls::Opportunistic => Tls::Opportunistic(parameters()?),
            SmtpTls::Starttls => Tls::Required(parameters()?),
            SmtpTls::Wrapper => Tls::Wrapper(parameters()?),
        })
    }

    fn construct_email_message(
        &self,
        subject: &str,
        name: &str,
        email: &str,
        body: &str,
    ) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format_subject(subject))
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = reply_to_mailbox(name, email) {
            builder = builder.reply_to(reply_to);
        }
        Ok(builder.body(format_body(name, email, body))?)
    }
}

#[async_trait]
impl ContactMailer for SmtpMailer {
    async fn send(
        &self,
        subject: &str,
        name: &str,
        email: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let message = self.construct_email_message(subject, name, email, body)?;
        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(MailError::Timeout(self.timeout)),
        }
    }
}

pub fn format_subject(subject: &str) -> String {
    format!("{SUBJECT_PREFIX}{subject}")
}

pub fn format_body(name: &str, email: &str, body: &str) -> String {
    format!("Name: {name}\nEmail: {email}\nMessage:\n{body}\n")
}

fn reply_to_mailbox(name: &str, email: &str) -> Option<Mailbox> {
    let reply_to_string = if name.is_empty() {
        email.to_string()
    } else {
        format!("{name} <{email}>")
    };
    match reply_to_string.parse() {
        Ok(mailbox) => Some(mailbox),
        Err(error) => {
            debug!("Omitting Reply-To for {reply_to_string:?}: {error}");
            None
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|source| MailError::InvalidAddress {
        address: address.into(),
        source,
    })
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: AddressError,
    },
    #[error("error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("error sending message: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("sending message timed out after {0:?}")]
    Timeout(Duration),
}
