pub mod config;
pub mod demo_page;
pub mod form;
pub mod handler;
pub mod ip;
pub mod mail;
pub mod recaptcha;

pub use form::ContactFormSubmission;
pub use handler::{router, ContactFormHandler, SubmitResponse};
