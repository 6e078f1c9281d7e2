//! Draft/commit editing of the model configuration
//!
//! `committed` mirrors what the backend last confirmed; `draft` is what the
//! user is editing. Both only ever change through the named transitions
//! below.

use super::types::{Config, ConfigPatch, ModelDescriptor};
use crate::api::{bounded, Backend};
use crate::config::ClientConfig;
use crate::controller::SharedState;
use crate::error::{ClientError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The two configuration slots and the model catalogue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSlots {
    committed: Option<Config>,
    draft: Option<Config>,
    models: Vec<ModelDescriptor>,
}

impl SettingsSlots {
    pub fn committed(&self) -> Option<&Config> {
        self.committed.as_ref()
    }

    pub fn draft(&self) -> Option<&Config> {
        self.draft.as_ref()
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn is_loaded(&self) -> bool {
        self.committed.is_some()
    }

    /// Whether the draft differs from the committed config
    pub fn is_dirty(&self) -> bool {
        self.draft != self.committed
    }

    pub fn knows_model(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.name == name)
    }

    fn seed(&mut self, config: Config) {
        self.draft = Some(config.clone());
        self.committed = Some(config);
    }

    fn commit(&mut self, config: Config) {
        self.seed(config);
    }

    fn discard_draft(&mut self) {
        self.draft = self.committed.clone();
    }

    fn set_models(&mut self, models: Vec<ModelDescriptor>) {
        self.models = models;
    }
}

fn not_loaded() -> ClientError {
    ClientError::InvalidState("Settings have not been loaded yet".to_string())
}

/// Loads, edits and persists the model configuration
///
/// Every backend request is bounded by the request timeout.
pub struct SettingsEditor<B> {
    backend: Arc<B>,
    state: SharedState,
    request_timeout: Duration,
}

impl<B: Backend> SettingsEditor<B> {
    pub fn new(backend: Arc<B>, state: SharedState) -> Self {
        Self {
            backend,
            state,
            request_timeout: ClientConfig::default().poll_timeout,
        }
    }

    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = limit;
        self
    }

    /// Fetch the model catalogue
    pub async fn load_models(&self) -> Result<()> {
        let models =
            bounded(self.request_timeout, "Loading models", self.backend.list_models()).await?;
        info!("Loaded {} models", models.len());
        self.state.write().settings.set_models(models);
        Ok(())
    }

    /// Fetch the active config; it becomes both committed and draft
    pub async fn load(&self) -> Result<()> {
        let config =
            bounded(self.request_timeout, "Loading settings", self.backend.get_config()).await?;
        info!("Loaded config for model {}", config.model);
        self.state.write().settings.seed(config);
        Ok(())
    }

    /// Merge a patch into the draft
    ///
    /// # Errors
    /// `UnknownModel` if the patch names a model outside the catalogue,
    /// `InvalidState` before the config has loaded. The draft is untouched
    /// on error.
    pub fn edit(&self, patch: &ConfigPatch) -> Result<()> {
        let mut state = self.state.write();
        let settings = &mut state.settings;

        if let Some(model) = &patch.model {
            if !settings.knows_model(model) {
                return Err(ClientError::UnknownModel(model.clone()));
            }
        }

        let draft = settings.draft.as_mut().ok_or_else(not_loaded)?;
        draft.apply(patch);
        debug!("Draft updated: {:?}", patch);
        Ok(())
    }

    /// Send the draft to the backend; on acceptance it becomes committed
    ///
    /// A rejected save keeps the draft as it was.
    pub async fn save(&self) -> Result<()> {
        let draft = self
            .state
            .read()
            .settings
            .draft
            .clone()
            .ok_or_else(not_loaded)?;

        bounded(
            self.request_timeout,
            "Saving settings",
            self.backend.save_config(draft.clone()),
        )
        .await?;
        info!("Saved config for model {}", draft.model);
        self.state.write().settings.commit(draft);
        Ok(())
    }

    /// Restore the backend defaults into both slots
    ///
    /// Returns `false` without contacting the backend unless `confirmed`.
    pub async fn reset_to_defaults(&self, confirmed: bool) -> Result<bool> {
        if !confirmed {
            debug!("Reset to defaults not confirmed");
            return Ok(false);
        }
        if !self.state.read().settings.is_loaded() {
            return Err(not_loaded());
        }

        let defaults = bounded(
            self.request_timeout,
            "Resetting settings",
            self.backend.reset_config(),
        )
        .await?;
        info!("Config reset to defaults ({})", defaults.model);
        self.state.write().settings.seed(defaults);
        Ok(true)
    }

    /// Throw away unsaved edits
    pub fn discard_draft(&self) {
        let mut state = self.state.write();
        if state.settings.is_dirty() {
            debug!("Discarding unsaved settings edits");
        }
        state.settings.discard_draft();
    }
}
