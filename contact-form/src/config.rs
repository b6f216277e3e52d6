//! Command line and environment configuration.

use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;

pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Relays contact form submissions as email after verifying reCAPTCHA.
#[derive(Parser, Clone)]
#[command(name = "contact-form", author, version, about, long_about = None)]
pub struct Config {
    /// Server port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Show demo form for testing under /demo
    #[arg(
        long,
        env = "DEMO",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub demo: bool,

    /// Site key for reCAPTCHA (only required for the demo form)
    #[arg(long, env = "SITE_KEY", default_value = "")]
    pub site_key: String,

    /// Private key for reCAPTCHA
    #[arg(long, env = "PRIVATE_KEY")]
    pub private_key: String,

    /// reCAPTCHA verification endpoint
    #[arg(long, env = "RECAPTCHA_VERIFY_URL", default_value = RECAPTCHA_VERIFY_URL)]
    pub recaptcha_verify_url: String,

    /// Sender email, also used as the SMTP username
    #[arg(long, env = "SMTP_SENDER")]
    pub smtp_sender: String,

    /// Contact recipient email
    #[arg(long, env = "SMTP_TO")]
    pub smtp_to: String,

    /// Sender password; no authentication is attempted without one
    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// SMTP host
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: String,

    /// SMTP port
    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    /// How the SMTP connection is secured
    #[arg(long, env = "SMTP_TLS", value_enum, default_value_t = SmtpTls::Starttls)]
    pub smtp_tls: SmtpTls,

    /// Upper bound in seconds on a single mail delivery
    #[arg(
        long,
        env = "SMTP_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub smtp_timeout_secs: u64,

    /// Trust the X-Forwarded-For header set by a reverse proxy
    #[arg(
        long,
        env = "TRUST_FORWARDED_FOR",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub trust_forwarded_for: bool,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(
        long,
        env = "JSON_LOGS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub json_logs: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpTls {
    /// Plaintext only
    None,
    /// STARTTLS when the server offers it
    Opportunistic,
    /// STARTTLS, refusing servers which do not offer it
    Starttls,
    /// Implicit TLS (SMTPS)
    Wrapper,
}

/// Everything the mailer needs to reach the relay.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub sender: String,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub recipient: String,
    pub tls: SmtpTls,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RecaptchaConfig {
    pub secret: String,
    pub verify_url: String,
}

impl Config {
    pub fn mail(&self) -> MailConfig {
        MailConfig {
            sender: self.smtp_sender.clone(),
            password: self
                .smtp_password
                .clone()
                .filter(|password| !password.is_empty()),
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            recipient: self.smtp_to.clone(),
            tls: self.smtp_tls,
            timeout: Duration::from_secs(self.smtp_timeout_secs),
        }
    }

    pub fn recaptcha(&self) -> RecaptchaConfig {
        RecaptchaConfig {
            secret: self.private_key.clone(),
            verify_url: self.recaptcha_verify_url.clone(),
        }
    }
}
