use axum::{extract::State, response::Html};
use serde::Serialize;
use std::sync::Arc;
use tinytemplate::{error::Error, TinyTemplate};

const DEMO_TEMPLATE_NAME: &str = "demo-template";
const DEMO_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/demo.html"));

#[derive(Serialize)]
struct Context<'a> {
    site_key: &'a str,
}

/// The demo form, rendered once at startup.
pub struct DemoPage(String);

impl DemoPage {
    pub fn render(site_key: &str) -> Result<Self, Error> {
        let mut tt = TinyTemplate::new();
        tt.add_template(DEMO_TEMPLATE_NAME, DEMO_TEMPLATE)?;
        Ok(Self(tt.render(DEMO_TEMPLATE_NAME, &Context { site_key })?))
    }

    pub fn html(&self) -> &str {
        &self.0
    }
}

pub async fn serve_demo(State(page): State<Arc<DemoPage>>) -> Html<String> {
    Html(page.html().to_string())
}
