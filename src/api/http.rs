//! HTTP implementation of the backend contract

use super::wire::{ConfigBody, Empty, EntriesBody, Envelope, ModelsBody, TextRequest};
use super::{Backend, AUDIO_REJECTED_FALLBACK, TEXT_REJECTED_FALLBACK};
use crate::audio::AudioPayload;
use crate::config::ClientConfig;
use crate::conversation::ConversationTurn;
use crate::error::{ClientError, Result};
use crate::settings::{Config, ModelDescriptor};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

/// Backend reached over HTTP/JSON
///
/// No timeout is set on the client: a submission may legitimately take as
/// long as the model needs.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Send a request and decode its envelope
    ///
    /// Error statuses still carry a JSON envelope, so the body is decoded
    /// before the status is looked at.
    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Envelope<T>> {
        let response = request.send().await.map_err(|e| {
            warn!("{} request failed: {}", what, e);
            ClientError::NetworkFailure(e.to_string())
        })?;

        let status = response.status();
        debug!("{} -> {}", what, status);

        response.json::<Envelope<T>>().await.map_err(|e| {
            warn!("{} returned an unreadable body ({}): {}", what, status, e);
            ClientError::NetworkFailure(format!("HTTP {}: {}", status, e))
        })
    }
}

impl Backend for HttpBackend {
    async fn list_turns(&self) -> Result<Vec<ConversationTurn>> {
        let request = self.client.get(self.config.endpoint("/api/conversation"));
        let body: EntriesBody = self
            .call(request, "list turns")
            .await?
            .into_result("Failed to load conversation")?;
        Ok(body.entries)
    }

    async fn clear_turns(&self) -> Result<()> {
        let request = self
            .client
            .post(self.config.endpoint("/api/conversation/clear"));
        self.call::<Empty>(request, "clear turns")
            .await?
            .into_result("Failed to clear conversation history")?;
        info!("Conversation history cleared on backend");
        Ok(())
    }

    async fn submit_audio(&self, payload: AudioPayload) -> Result<()> {
        let size = payload.bytes.len();
        let part = Part::bytes(payload.bytes)
            .file_name(payload.file_name)
            .mime_str(&payload.mime_type)
            .map_err(|e| ClientError::DeviceError(format!("Invalid audio type: {}", e)))?;
        let form = Form::new().part("audio", part);

        info!("Submitting {} bytes of audio", size);
        let request = self
            .client
            .post(self.config.endpoint("/api/record-audio"))
            .multipart(form);
        self.call::<Empty>(request, "submit audio")
            .await?
            .into_result(AUDIO_REJECTED_FALLBACK)?;
        Ok(())
    }

    async fn submit_text(&self, text: String) -> Result<()> {
        info!("Submitting text turn ({} chars)", text.chars().count());
        let request = self
            .client
            .post(self.config.endpoint("/api/text-input"))
            .json(&TextRequest { text: &text });
        self.call::<Empty>(request, "submit text")
            .await?
            .into_result(TEXT_REJECTED_FALLBACK)?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let request = self.client.get(self.config.endpoint("/api/models"));
        let body: ModelsBody = self
            .call(request, "list models")
            .await?
            .into_result("Failed to list models")?;
        Ok(body.models)
    }

    async fn get_config(&self) -> Result<Config> {
        let request = self.client.get(self.config.endpoint("/api/config"));
        self.call::<ConfigBody>(request, "get config")
            .await?
            .into_result("Failed to load settings")?
            .require()
    }

    async fn save_config(&self, config: Config) -> Result<Option<Config>> {
        let request = self
            .client
            .post(self.config.endpoint("/api/config"))
            .json(&config);
        let body = self
            .call::<ConfigBody>(request, "save config")
            .await?
            .into_result("Failed to save settings")?;
        Ok(body.config)
    }

    async fn reset_config(&self) -> Result<Config> {
        let request = self.client.post(self.config.endpoint("/api/config/reset"));
        self.call::<ConfigBody>(request, "reset config")
            .await?
            .into_result("Failed to reset settings")?
            .require()
    }
}
