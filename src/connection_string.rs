//! Parsing of `key=value;key=value` broker connection strings.

use std::fmt;
use std::str::FromStr;

use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};

use crate::errors::{MessagingError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_VHOST: &str = "/";

/// Broker connection parameters.
///
/// Recognised keys are `host`, `port`, `user`, `pass` and `vhost` (case-insensitive).
/// Unknown keys are ignored; missing keys and empty values keep the broker defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            vhost: DEFAULT_VHOST.to_string(),
        }
    }
}

impl ConnectionParams {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut params = Self::default();

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            // Segments without '=' carry no value and are skipped like unknown keys.
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if key.is_empty() {
                return Err(MessagingError::InvalidConnectionString(format!(
                    "segment '{}' has an empty key",
                    segment
                )));
            }
            if value.is_empty() {
                continue;
            }

            match key.to_ascii_lowercase().as_str() {
                "host" => params.host = value.to_string(),
                "port" => {
                    params.port = value.parse().map_err(|_| {
                        MessagingError::InvalidConnectionString(format!(
                            "port '{}' is not a valid TCP port",
                            value
                        ))
                    })?
                }
                "user" => params.user = value.to_string(),
                "pass" => params.password = value.to_string(),
                "vhost" => params.vhost = value.to_string(),
                _ => {}
            }
        }

        Ok(params)
    }

    /// Structured AMQP URI, so credentials and vhost need no escaping.
    pub fn to_amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }
}

impl FromStr for ConnectionParams {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Password is never rendered.
impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "amqp://{}@{}:{} (vhost '{}')",
            self.user, self.host, self.port, self.vhost
        )
    }
}
