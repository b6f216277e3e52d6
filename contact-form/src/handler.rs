//! Turns a form submission into a relayed email.
//!
//! Every outcome is reported as a JSON body with status 200. Clients only need to look at
//! `success` and the `error` tag; details of a failure end up in the server log.

use crate::{
    demo_page::{serve_demo, DemoPage},
    form::{parse_form, ContactFormSubmission},
    ip::{resolve_client_ip, FORWARDED_FOR_HEADER},
    mail::ContactMailer,
    recaptcha::CaptchaVerifier,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl SubmitResponse {
    fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failure(error: &'static str) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

pub struct ContactFormHandler<VerifierT: CaptchaVerifier, MailerT: ContactMailer> {
    verifier: VerifierT,
    mailer: MailerT,
    trust_forwarded_for: bool,
}

impl<VerifierT: CaptchaVerifier, MailerT: ContactMailer> ContactFormHandler<VerifierT, MailerT> {
    pub fn new(verifier: VerifierT, mailer: MailerT, trust_forwarded_for: bool) -> Self {
        Self {
            verifier,
            mailer,
            trust_forwarded_for,
        }
    }

    pub async fn handle(
        &self,
        peer_addr: Option<SocketAddr>,
        headers: &HeaderMap,
        body: Result<Bytes, BytesRejection>,
    ) -> SubmitResponse {
        let fields = match parse_form(headers, body) {
            Ok(fields) => fields,
            Err(error) => {
                error!("Error parsing form: {error}");
                return SubmitResponse::failure("invalid-form");
            }
        };
        let submission = match ContactFormSubmission::from_fields(fields) {
            Ok(submission) => submission,
            Err(error) => {
                error!("Error decoding form: {error}");
                return SubmitResponse::failure("invalid-decoded-form");
            }
        };
        let remote_ip = self.client_ip(peer_addr, headers);
        self.process_submission(&remote_ip, submission).await
    }

    async fn process_submission(
        &self,
        remote_ip: &str,
        submission: ContactFormSubmission,
    ) -> SubmitResponse {
        let verified = self
            .verifier
            .verify(remote_ip, &submission.captcha_token)
            .await;
        info!("reCAPTCHA verified for {remote_ip:?}: {verified}");
        if !verified {
            return SubmitResponse::failure("recaptcha-failed");
        }

        match self
            .mailer
            .send(
                &submission.subject,
                &submission.name,
                &submission.email,
                &submission.message,
            )
            .await
        {
            Ok(()) => {
                info!("SMTP send successful");
                SubmitResponse::success()
            }
            Err(error) => {
                error!("Error sending mail: {error}");
                SubmitResponse::failure("smtp-failed")
            }
        }
    }

    fn client_ip(&self, peer_addr: Option<SocketAddr>, headers: &HeaderMap) -> String {
        let peer_addr = peer_addr.map(|addr| addr.to_string()).unwrap_or_default();
        let forwarded_for = if self.trust_forwarded_for {
            headers
                .get(FORWARDED_FOR_HEADER)
                .and_then(|value| value.to_str().ok())
        } else {
            None
        };
        resolve_client_ip(&peer_addr, forwarded_for).unwrap_or_else(|error| {
            warn!("Could not resolve client IP: {error}");
            String::new()
        })
    }
}

/// Builds the service's routes. `/demo` is only served when a demo page is given.
pub fn router<VerifierT, MailerT>(
    handler: ContactFormHandler<VerifierT, MailerT>,
    demo_page: Option<DemoPage>,
) -> Router
where
    VerifierT: CaptchaVerifier + 'static,
    MailerT: ContactMailer + 'static,
{
    let mut router = Router::new()
        .route("/", post(submit::<VerifierT, MailerT>))
        .with_state(Arc::new(handler));
    if let Some(demo_page) = demo_page {
        router = router.merge(
            Router::new()
                .route("/demo", get(serve_demo))
                .with_state(Arc::new(demo_page)),
        );
    }
    router.layer(TraceLayer::new_for_http())
}

async fn submit<VerifierT, MailerT>(
    State(handler): State<Arc<ContactFormHandler<VerifierT, MailerT>>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Json<SubmitResponse>
where
    VerifierT: CaptchaVerifier + 'static,
    MailerT: ContactMailer + 'static,
{
    let peer_addr = connect_info.map(|ConnectInfo(addr)| addr);
    Json(handler.handle(peer_addr, &headers, body).await)
}

#[cfg(test)]
mod tests {
    use super::{router, ContactFormHandler};
    use crate::{
        demo_page::DemoPage,
        mail::{ContactMailer, MailError},
        recaptcha::CaptchaVerifier,
    };
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use googletest::prelude::*;
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tower::ServiceExt;

    const PEER_ADDR: &str = "203.0.113.5:54321";
    const FORM_BODY: &str = "name=Arbitrary+sender&email=email%40example.com&subject=Test\
        &message=Test+message&g-recaptcha-response=arbitrary+token";

    #[derive(Clone, Default)]
    struct FakeVerifier {
        accept: bool,
        calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl CaptchaVerifier for FakeVerifier {
        async fn verify(&self, remote_ip: &str, token: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push((remote_ip.into(), token.into()));
            self.accept
        }
    }

    #[derive(Clone, Default)]
    struct FakeMailer {
        fail: bool,
        sent: Arc<Mutex<Vec<[String; 4]>>>,
    }

    #[async_trait]
    impl ContactMailer for FakeMailer {
        async fn send(
            &self,
            subject: &str,
            name: &str,
            email: &str,
            body: &str,
        ) -> std::result::Result<(), MailError> {
            self.sent
                .lock()
                .unwrap()
                .push([subject.into(), name.into(), email.into(), body.into()]);
            if self.fail {
                Err(MailError::Timeout(Duration::from_secs(1)))
            } else {
                Ok(())
            }
        }
    }

    fn accepting_verifier() -> FakeVerifier {
        FakeVerifier {
            accept: true,
            ..Default::default()
        }
    }

    fn failing_mailer() -> FakeMailer {
        FakeMailer {
            fail: true,
            ..Default::default()
        }
    }

    fn form_request(content_type: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .extension(ConnectInfo(PEER_ADDR.parse::<SocketAddr>().unwrap()))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn submission(body: &str) -> Request<Body> {
        form_request("application/x-www-form-urlencoded", body)
    }

    async fn post(
        verifier: FakeVerifier,
        mailer: FakeMailer,
        request: Request<Body>,
    ) -> (StatusCode, String) {
        let app = router(ContactFormHandler::new(verifier, mailer, true), None);
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_text(response).await)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[googletest::test]
    #[tokio::test]
    async fn reports_success_when_verified_and_sent() {
        let mailer = FakeMailer::default();

        let (status, body) = post(accepting_verifier(), mailer.clone(), submission(FORM_BODY)).await;

        expect_that!(status, eq(StatusCode::OK));
        expect_that!(body, eq(r#"{"success":true}"#));
        expect_that!(
            *mailer.sent.lock().unwrap(),
            elements_are![elements_are![
                eq("Test"),
                eq("Arbitrary sender"),
                eq("email@example.com"),
                eq("Test message")
            ]]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn does_not_send_mail_when_captcha_fails() {
        let mailer = FakeMailer::default();

        let (status, body) =
            post(FakeVerifier::default(), mailer.clone(), submission(FORM_BODY)).await;

        expect_that!(status, eq(StatusCode::OK));
        expect_that!(body, eq(r#"{"success":false,"error":"recaptcha-failed"}"#));
        expect_that!(*mailer.sent.lock().unwrap(), empty());
    }

    #[tokio::test]
    async fn reports_smtp_failure() -> Result<()> {
        let (_, body) = post(accepting_verifier(), failing_mailer(), submission(FORM_BODY)).await;

        verify_that!(body, eq(r#"{"success":false,"error":"smtp-failed"}"#))
    }

    #[googletest::test]
    #[tokio::test]
    async fn rejects_non_form_body() {
        let verifier = accepting_verifier();
        let mailer = FakeMailer::default();

        let (status, body) = post(
            verifier.clone(),
            mailer.clone(),
            form_request("application/json", r#"{"name":"Arbitrary sender"}"#),
        )
        .await;

        expect_that!(status, eq(StatusCode::OK));
        expect_that!(body, eq(r#"{"success":false,"error":"invalid-form"}"#));
        expect_that!(*verifier.calls.lock().unwrap(), empty());
        expect_that!(*mailer.sent.lock().unwrap(), empty());
    }

    #[tokio::test]
    async fn rejects_body_without_content_type() -> Result<()> {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(FORM_BODY))
            .unwrap();

        let (_, body) = post(accepting_verifier(), FakeMailer::default(), request).await;

        verify_that!(body, eq(r#"{"success":false,"error":"invalid-form"}"#))
    }

    #[tokio::test]
    async fn rejects_unknown_fields() -> Result<()> {
        let (_, body) = post(
            accepting_verifier(),
            FakeMailer::default(),
            submission(&format!("{FORM_BODY}&unexpected=field")),
        )
        .await;

        verify_that!(
            body,
            eq(r#"{"success":false,"error":"invalid-decoded-form"}"#)
        )
    }

    #[googletest::test]
    #[tokio::test]
    async fn rejects_malformed_escape_without_verifying() {
        let verifier = accepting_verifier();
        let mailer = FakeMailer::default();

        let (status, body) = post(
            verifier.clone(),
            mailer.clone(),
            submission("name=%zz&g-recaptcha-response=t"),
        )
        .await;

        expect_that!(status, eq(StatusCode::OK));
        expect_that!(body, eq(r#"{"success":false,"error":"invalid-form"}"#));
        expect_that!(*verifier.calls.lock().unwrap(), empty());
        expect_that!(*mailer.sent.lock().unwrap(), empty());
    }

    #[tokio::test]
    async fn rejects_semicolon_separated_body() -> Result<()> {
        let (_, body) = post(
            accepting_verifier(),
            FakeMailer::default(),
            submission("name=a;g-recaptcha-response=t"),
        )
        .await;

        verify_that!(body, eq(r#"{"success":false,"error":"invalid-form"}"#))
    }

    #[googletest::test]
    #[tokio::test]
    async fn uses_last_value_of_repeated_field() {
        let mailer = FakeMailer::default();

        let (_, body) = post(
            accepting_verifier(),
            mailer.clone(),
            submission("name=a&name=b&g-recaptcha-response=t"),
        )
        .await;

        expect_that!(body, eq(r#"{"success":true}"#));
        expect_that!(
            *mailer.sent.lock().unwrap(),
            elements_are![elements_are![eq(""), eq("b"), eq(""), eq("")]]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn decodes_missing_fields_as_empty() {
        let verifier = accepting_verifier();
        let mailer = FakeMailer::default();

        let (_, body) = post(verifier.clone(), mailer.clone(), submission("name=Someone")).await;

        expect_that!(body, eq(r#"{"success":true}"#));
        expect_that!(
            *verifier.calls.lock().unwrap(),
            elements_are![(eq("203.0.113.5"), eq(""))]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn verifies_token_with_peer_ip() {
        let verifier = accepting_verifier();

        post(verifier.clone(), FakeMailer::default(), submission(FORM_BODY)).await;

        expect_that!(
            *verifier.calls.lock().unwrap(),
            elements_are![(eq("203.0.113.5"), eq("arbitrary token"))]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn verifies_token_with_forwarded_ip() {
        let verifier = accepting_verifier();
        let mut request = submission(FORM_BODY);
        request
            .headers_mut()
            .insert("X-Forwarded-For", "198.51.100.9".parse().unwrap());

        post(verifier.clone(), FakeMailer::default(), request).await;

        expect_that!(
            *verifier.calls.lock().unwrap(),
            elements_are![(eq("198.51.100.9"), anything())]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn ignores_forwarded_ip_when_not_trusted() {
        let verifier = accepting_verifier();
        let mut request = submission(FORM_BODY);
        request
            .headers_mut()
            .insert("X-Forwarded-For", "198.51.100.9".parse().unwrap());
        let app = router(
            ContactFormHandler::new(verifier.clone(), FakeMailer::default(), false),
            None,
        );

        app.oneshot(request).await.unwrap();

        expect_that!(
            *verifier.calls.lock().unwrap(),
            elements_are![(eq("203.0.113.5"), anything())]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn verifies_with_empty_ip_when_peer_is_unknown() {
        let verifier = accepting_verifier();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(FORM_BODY))
            .unwrap();

        let (_, body) = post(verifier.clone(), FakeMailer::default(), request).await;

        expect_that!(body, eq(r#"{"success":true}"#));
        expect_that!(
            *verifier.calls.lock().unwrap(),
            elements_are![(eq(""), anything())]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn serves_demo_page_when_enabled() {
        let app = router(
            ContactFormHandler::new(accepting_verifier(), FakeMailer::default(), true),
            Some(DemoPage::render("arbitrary-site-key").unwrap()),
        );
        let request = Request::builder().uri("/demo").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        expect_that!(response.status(), eq(StatusCode::OK));
        expect_that!(
            body_text(response).await,
            contains_substring(r#"data-sitekey="arbitrary-site-key""#)
        );
    }

    #[tokio::test]
    async fn does_not_serve_demo_page_when_disabled() -> Result<()> {
        let app = router(
            ContactFormHandler::new(accepting_verifier(), FakeMailer::default(), true),
            None,
        );
        let request = Request::builder().uri("/demo").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        verify_that!(response.status(), eq(StatusCode::NOT_FOUND))
    }
}
