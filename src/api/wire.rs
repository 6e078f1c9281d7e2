//! Response envelopes
//!
//! All responses share a `success` discriminator. A `success: false` body is a
//! rejection, not a transport failure, whatever the HTTP status.

use crate::conversation::ConversationTurn;
use crate::error::{ClientError, Result};
use crate::settings::{Config, ModelDescriptor};
use serde::{Deserialize, Serialize};

/// Common response shape; endpoint-specific fields are flattened into `body`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Turn a rejection into `BackendRejected`, using `fallback` when the
    /// backend gave no reason
    pub fn into_result(self, fallback: &str) -> Result<T> {
        if self.success {
            Ok(self.body)
        } else {
            let reason = self
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string());
            Err(ClientError::BackendRejected(reason))
        }
    }
}

/// Endpoints that only acknowledge
#[derive(Debug, Default, Deserialize)]
pub struct Empty {}

#[derive(Debug, Default, Deserialize)]
pub struct EntriesBody {
    #[serde(default)]
    pub entries: Vec<ConversationTurn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsBody {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigBody {
    #[serde(default)]
    pub config: Option<Config>,
}

impl ConfigBody {
    /// Require the config to be present
    pub fn require(self) -> Result<Config> {
        self.config.ok_or_else(|| {
            ClientError::NetworkFailure("response is missing the config".to_string())
        })
    }
}

/// Body of the text submission
#[derive(Debug, Serialize)]
pub struct TextRequest<'a> {
    pub text: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_uses_backend_text() {
        let env: Envelope<Empty> =
            serde_json::from_str(r#"{"success": false, "error": "Empty text"}"#).unwrap();
        assert_eq!(
            env.into_result("fallback").unwrap_err(),
            ClientError::BackendRejected("Empty text".into())
        );
    }

    #[test]
    fn test_rejection_without_reason_uses_fallback() {
        let env: Envelope<Empty> = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(
            env.into_result("Failed to process text").unwrap_err(),
            ClientError::BackendRejected("Failed to process text".into())
        );
    }

    #[test]
    fn test_rejected_listing_has_no_entries() {
        let env: Envelope<EntriesBody> =
            serde_json::from_str(r#"{"success": false, "error": "disk"}"#).unwrap();
        assert!(env.into_result("x").is_err());
    }

    #[test]
    fn test_entries_keep_server_order() {
        let env: Envelope<EntriesBody> = serde_json::from_str(
            r#"{"success": true, "entries": [
                {"input": "first", "output": "1"},
                {"input": "second", "output": "2"}
            ]}"#,
        )
        .unwrap();
        let entries = env.into_result("x").unwrap().entries;
        assert_eq!(entries[0].input, "first");
        assert_eq!(entries[1].input, "second");
    }

    #[test]
    fn test_save_ack_without_config() {
        let env: Envelope<ConfigBody> =
            serde_json::from_str(r#"{"success": true, "message": "Configuration saved"}"#)
                .unwrap();
        assert!(env.into_result("x").unwrap().config.is_none());
    }
}
