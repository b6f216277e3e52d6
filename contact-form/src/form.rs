//! Parsing of `application/x-www-form-urlencoded` submissions.
//!
//! Parsing happens in two stages so that the handler can tell a malformed body apart from one
//! that is well formed but does not describe a contact submission.

use axum::{
    body::Bytes,
    extract::rejection::BytesRejection,
    http::{header, HeaderMap},
};
use thiserror::Error;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContactFormSubmission {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub captcha_token: String,
}

impl ContactFormSubmission {
    /// Maps decoded pairs onto the submission. A repeated key overwrites the earlier value and
    /// an absent key leaves its field empty.
    pub fn from_fields(fields: Vec<(String, String)>) -> Result<Self, DecodeError> {
        fields
            .into_iter()
            .try_fold(Self::default(), |mut submission, (key, value)| {
                let Some(field) = submission.field_mut(&key) else {
                    return Err(DecodeError::UnknownField(key));
                };
                *field = value;
                Ok(submission)
            })
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            "name" => Some(&mut self.name),
            "email" => Some(&mut self.email),
            "subject" => Some(&mut self.subject),
            "message" => Some(&mut self.message),
            "g-recaptcha-response" => Some(&mut self.captcha_token),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read body: {0}")]
    Body(#[from] BytesRejection),
    #[error("expected content type {FORM_CONTENT_TYPE}")]
    ContentType,
    #[error("invalid semicolon separator in {0:?}")]
    Semicolon(String),
    #[error("invalid URL escape in {0:?}")]
    InvalidEscape(String),
    #[error(transparent)]
    Encoding(#[from] serde_urlencoded::de::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown field {0:?}")]
    UnknownField(String),
}

/// Splits a form body into decoded key/value pairs in the order they appear.
///
/// Every `%` must start a two digit hex escape and no pair may contain `;`. Anything else is
/// rejected rather than passed through literally.
pub fn parse_form(
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Vec<(String, String)>, ParseError> {
    if !has_form_content_type(headers) {
        return Err(ParseError::ContentType);
    }
    let body = body?;
    for pair in body.split(|byte| *byte == b'&').filter(|pair| !pair.is_empty()) {
        if pair.contains(&b';') {
            return Err(ParseError::Semicolon(lossy(pair)));
        }
        if has_invalid_escape(pair) {
            return Err(ParseError::InvalidEscape(lossy(pair)));
        }
    }
    Ok(serde_urlencoded::from_bytes(&body)?)
}

fn has_form_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

fn has_invalid_escape(pair: &[u8]) -> bool {
    pair.iter().enumerate().any(|(index, byte)| {
        *byte == b'%'
            && !pair
                .get(index + 1..index + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

fn lossy(pair: &[u8]) -> String {
    String::from_utf8_lossy(pair).into_owned()
}
