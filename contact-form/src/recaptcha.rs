use crate::config::RecaptchaConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns `true` only when the provider positively confirmed the token.
    async fn verify(&self, remote_ip: &str, token: &str) -> bool;
}

/// Verifies tokens produced by the reCAPTCHA widget against the siteverify API.
pub struct RecaptchaVerifier {
    client: Client,
    secret: String,
    verify_url: String,
}

impl RecaptchaVerifier {
    pub fn new(config: &RecaptchaConfig) -> Result<Self, RecaptchaError> {
        let client = Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .map_err(RecaptchaError::Client)?;
        Ok(Self {
            client,
            secret: config.secret.clone(),
            verify_url: config.verify_url.clone(),
        })
    }

    async fn check(
        &self,
        remote_ip: &str,
        token: &str,
    ) -> Result<RecaptchaResponse, RecaptchaError> {
        let response = self.send_token(remote_ip, token).await?;
        Self::process_response(response).await
    }

    async fn send_token(&self, remote_ip: &str, token: &str) -> Result<Response, RecaptchaError> {
        self.client
            .post(&self.verify_url)
            .form(&RecaptchaVerifyPayload {
                secret: &self.secret,
                remoteip: remote_ip,
                response: token,
            })
            .send()
            .await
            .map_err(RecaptchaError::Transport)
    }

    async fn process_response(response: Response) -> Result<RecaptchaResponse, RecaptchaError> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RecaptchaError::UnexpectedStatus(status));
        }
        response.json().await.map_err(RecaptchaError::InvalidBody)
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, remote_ip: &str, token: &str) -> bool {
        match self.check(remote_ip, token).await {
            Ok(response) => {
                info!(
                    "reCAPTCHA success: {}, hostname: {:?}, challenge_ts: {:?}, error codes: {:?}",
                    response.success,
                    response.hostname,
                    response.challenge_ts,
                    response.error_codes
                );
                response.success
            }
            Err(error) => {
                warn!("Error verifying reCAPTCHA token: {error}");
                warn!("Rejecting request as unverified.");
                false
            }
        }
    }
}

#[derive(Serialize)]
struct RecaptchaVerifyPayload<'a> {
    secret: &'a str,
    remoteip: &'a str,
    response: &'a str,
}

/// https://developers.google.com/recaptcha/docs/verify
#[derive(Deserialize, Debug)]
struct RecaptchaResponse {
    success: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    challenge_ts: Option<DateTime<Utc>>,
    hostname: Option<String>,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// `challenge_ts` is only logged, so a value that is not RFC 3339 is dropped instead of failing
/// the whole verification.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|timestamp| DateTime::parse_from_rfc3339(timestamp).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc)))
}

#[derive(Debug, Error)]
pub enum RecaptchaError {
    #[error("could not build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request to verification endpoint failed: {0}")]
    Transport(reqwest::Error),
    #[error("verification endpoint returned {0}")]
    UnexpectedStatus(StatusCode),
    #[error("invalid response body: {0}")]
    InvalidBody(reqwest::Error),
}
