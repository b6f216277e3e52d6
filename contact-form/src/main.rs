use anyhow::{Context, Result};
use clap::Parser;
use contact_form::{
    config::Config, demo_page::DemoPage, mail::SmtpMailer, recaptcha::RecaptchaVerifier, router,
    ContactFormHandler,
};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level, config.json_logs);

    let verifier = RecaptchaVerifier::new(&config.recaptcha())
        .context("Could not initialise reCAPTCHA verifier")?;
    let mailer = SmtpMailer::new(&config.mail()).context("Could not initialise mailer")?;
    let handler = ContactFormHandler::new(verifier, mailer, config.trust_forwarded_for);
    let demo_page = if config.demo {
        if config.site_key.is_empty() {
            warn!("Serving /demo without a reCAPTCHA site key");
        }
        Some(DemoPage::render(&config.site_key).context("Could not render demo page")?)
    } else {
        None
    };
    let app = router(handler, demo_page);

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))
        .await
        .with_context(|| format!("Failed to start server on port {}", config.port))?;
    info!(
        "{} {} listening on {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Could not install Ctrl+C handler: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
