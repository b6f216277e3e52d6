use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/recaptcha/api/siteverify";

/// Stands in for the reCAPTCHA siteverify API.
///
/// Each instance listens on its own ephemeral port, so tests using it may run in parallel.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_solution: Option<String>,
    return_invalid_response: bool,
    return_server_error: bool,
    received_remote_ips: Arc<Mutex<Vec<String>>>,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    #[serde(default)]
    remoteip: String,
    #[serde(default)]
    response: String,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_solution: None,
            return_invalid_response: false,
            return_server_error: false,
            received_remote_ips: Default::default(),
        }
    }

    pub fn require_solution(self, required_solution: impl AsRef<str>) -> Self {
        Self {
            required_solution: Some(required_solution.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    /// Starts serving in the background and returns the verification URL.
    pub async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}{VERIFY_PATH}")
    }

    /// A verification URL on which nothing listens.
    pub fn unreachable_url() -> String {
        format!("http://127.0.0.1:1{VERIFY_PATH}")
    }

    pub fn received_remote_ips(&self) -> Vec<String> {
        self.received_remote_ips.lock().unwrap().clone()
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    state
        .received_remote_ips
        .lock()
        .unwrap()
        .push(payload.remoteip.clone());
    if state.return_server_error {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        failure("invalid-input-secret")
    } else if payload.response.is_empty() {
        failure("missing-input-response")
    } else if state
        .required_solution
        .as_ref()
        .is_some_and(|solution| *solution != payload.response)
    {
        failure("invalid-input-response")
    } else {
        Json(json!({
            "success": true,
            "challenge_ts": "2024-05-01T10:54:37Z",
            "hostname": "localhost",
        }))
        .into_response()
    }
}

fn failure(error_code: &str) -> Response {
    Json(json!({
        "success": false,
        "error-codes": [error_code],
    }))
    .into_response()
}
