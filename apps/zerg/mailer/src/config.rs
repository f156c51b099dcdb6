use core_config::{ConfigError, FromEnv, env_or_default, env_parse};

/// Where the health server listens.
///
/// `MAILER_HEALTH_PORT` wins over `HEALTH_PORT`. `PORT` is left to the
/// public API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl HealthServerConfig {
    pub const DEFAULT_PORT: u16 = 8082;

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for HealthServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("MAILER_HEALTH_HOST", "0.0.0.0");
        let port = match std::env::var("MAILER_HEALTH_PORT") {
            Ok(_) => env_parse("MAILER_HEALTH_PORT", Self::DEFAULT_PORT)?,
            Err(_) => env_parse("HEALTH_PORT", Self::DEFAULT_PORT)?,
        };
        Ok(Self { host, port })
    }
}
