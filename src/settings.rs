use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::access::types::AccessControlSettings;
use crate::errors::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub access_control: AccessControlSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, GatewayError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)?
            .set_default("server.port", Server::default().port)?
            .set_default(
                "access_control.default_policy",
                AccessControlSettings::default().default_policy,
            )?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: LODESTAR__SERVER__PORT=9091, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("LODESTAR").separator("__"));

        let cfg = builder.build()?;
        let settings: Settings = cfg.try_deserialize()?;
        Ok(settings)
    }
}
