//! Wire format for envelopes.

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{MessagingError, Result};

/// Turns envelopes into broker payloads and back.
///
/// Field naming, enum rendering and null handling are declared on the message
/// types themselves (camelCase keys, enum names, `None` omitted), so every codec
/// sees the same shape.
pub trait Codec: Send + Sync + 'static {
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented output, handy when reading queues in the management UI.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| {
                MessagingError::DeserializationError(format!("payload is not UTF-8: {}", e))
            })?;
        serde_json::from_str(text).map_err(|e| MessagingError::DeserializationError(e.to_string()))
    }
}
