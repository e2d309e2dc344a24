use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use lodestar::access::errors::{AccessError, Severity};
use lodestar::access::{validator, web, AccessControlHandle};
use lodestar::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "lodestar",
    version,
    about = "Access control authorization engine for an authentication gateway"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(config = %cli.config, "Loaded configuration");

    // compile the access control rules; surface every problem at once
    let (acl, diagnostics) = validator::validate(&settings.access_control);
    for diagnostic in &diagnostics {
        match diagnostic.severity {
            Severity::Error => tracing::error!("{diagnostic}"),
            Severity::Warning => tracing::warn!("{diagnostic}"),
        }
    }

    // fail closed: refuse to serve traffic with an invalid rule set
    let Some(acl) = acl else {
        return Err(AccessError::InvalidConfiguration {
            errors: validator::fatal_errors(&diagnostics),
        }
        .into());
    };

    let handle = AccessControlHandle::new(acl);

    // start web server
    web::serve(settings, handle, cli.config).await?;
    Ok(())
}
