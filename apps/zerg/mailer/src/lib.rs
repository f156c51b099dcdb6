//! Mailer Service
//!
//! Hosts the email delivery stack behind a small health server so that
//! orchestrators can probe the configured providers.
//!
//! ## Architecture
//!
//! ```text
//! GET /health, /healthz
//!   ↓
//! EmailService::check_email_health
//!   ↓ (primary + fallback, probed concurrently)
//! ProviderRegistry (cached, health-checked instances)
//!   ↓
//! Resend / Amazon SES / console
//! ```
//!
//! Configuration comes from the environment (`EMAIL_PROVIDER`,
//! `EMAIL_FALLBACK_PROVIDER`, provider credentials, `MAILER_HEALTH_PORT`).

pub mod config;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use config::HealthServerConfig;
use core_config::{Environment, FromEnv};
use domain_mailer::{EmailHealthReport, EmailService};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "zerg_mailer";

/// Health routes backed by `service`.
///
/// Both paths return the [`EmailHealthReport`] as JSON: `200` when either
/// provider is healthy, `503` otherwise.
pub fn router(service: EmailService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .with_state(service)
}

async fn health_handler(
    State(service): State<EmailService>,
) -> (StatusCode, Json<EmailHealthReport>) {
    let report = service.check_email_health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        warn!(report = ?report, "Email providers unhealthy");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Run the mailer service
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Builds the email service from the environment
/// 3. Probes the providers once so misconfiguration shows up in the logs
/// 4. Serves the health endpoints until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if the templates fail to compile, the health server
/// configuration is invalid or the listener cannot bind.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment, SERVICE_NAME);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %environment,
        "Starting mailer service"
    );

    let server_config =
        HealthServerConfig::from_env().wrap_err("Failed to load health server configuration")?;

    let service = EmailService::from_env().wrap_err("Failed to initialize email service")?;

    let report = service.check_email_health().await;
    if report.healthy {
        info!(report = ?report, "Email providers ready");
    } else {
        warn!(report = ?report, "No healthy email provider at startup");
    }

    let addr = server_config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Health server failed")?;

    info!("Mailer service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use domain_mailer::{HandlebarsTemplateRegistry, ProviderConfigResolver, ProviderRegistry};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt; // For oneshot()

    fn service(vars: &[(&str, &str)]) -> EmailService {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EmailService::new(
            ProviderConfigResolver::new(Arc::new(source)),
            Arc::new(ProviderRegistry::new()),
            Arc::new(HandlebarsTemplateRegistry::new().unwrap()),
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_ok_with_console_provider() {
        let app = router(service(&[("EMAIL_PROVIDER", "console")]));

        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["primary"]["provider"], "Console");
    }

    #[tokio::test]
    async fn test_healthz_alias() {
        let app = router(service(&[]));

        let (status, body) = get(app, "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_health_unavailable_on_configuration_error() {
        let app = router(service(&[("APP_ENV", "production")]));

        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["healthy"], false);
        assert_eq!(body["primary"]["provider"], "configuration");
    }
}
