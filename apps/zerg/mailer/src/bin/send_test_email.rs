//! Send a single email through the configured provider chain.
//!
//! Run with: cargo run -p zerg_mailer --bin send_test_email -- --to you@example.com
//!
//! Templated: `--template welcome --props '{"userName":"Ada","appName":"Zerg"}'`

use clap::Parser;
use core_config::{Environment, env_or_default};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_mailer::config::{DEFAULT_FROM_ADDRESS, EMAIL_FROM_ADDRESS};
use domain_mailer::{EmailMessage, EmailService, TemplateEmailRequest};
use eyre::{Result, WrapErr, bail};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "send_test_email")]
#[command(about = "Send a test email using EMAIL_PROVIDER and friends")]
struct Cli {
    /// Recipient address
    #[arg(short, long)]
    to: String,

    /// Sender address; defaults to EMAIL_FROM_ADDRESS
    #[arg(short, long)]
    from: Option<String>,

    /// Subject for a plain (non-templated) message
    #[arg(short, long, default_value = "Test email from Zerg")]
    subject: String,

    /// Render this built-in template instead of the plain body
    #[arg(long)]
    template: Option<String>,

    /// Template props as a JSON object
    #[arg(long, default_value = "{}")]
    props: String,

    /// Tenant whose branding should be applied
    #[arg(long)]
    tenant: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();
    init_tracing(&Environment::from_env(), "send_test_email");

    let cli = Cli::parse();
    let service = EmailService::from_env().wrap_err("Failed to initialize email service")?;

    let result = match cli.template {
        Some(template_id) => {
            let props: Value =
                serde_json::from_str(&cli.props).wrap_err("--props must be valid JSON")?;
            let mut request = TemplateEmailRequest::new(template_id, cli.to, props);
            if let Some(from) = cli.from {
                request = request.with_from(from);
            }
            if let Some(tenant) = cli.tenant {
                request = request.with_tenant(tenant);
            }
            service.send_template_email(request).await
        }
        None => {
            let from = cli
                .from
                .unwrap_or_else(|| env_or_default(EMAIL_FROM_ADDRESS, DEFAULT_FROM_ADDRESS));
            let mut message = EmailMessage::new(
                from,
                cli.to,
                cli.subject,
                "<h1>Hello!</h1><p>This is a test email from the Zerg mailer.</p>",
            )
            .with_text("Hello! This is a test email from the Zerg mailer.");
            if let Some(tenant) = cli.tenant {
                message = message.with_tenant(tenant);
            }
            service.send_email(&message).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!("delivery failed");
    }
    Ok(())
}
