use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(lodestar::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(lodestar::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(lodestar::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(#[from] crate::access::errors::AccessError),
}
