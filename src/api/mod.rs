//! Backend contract
//!
//! The client talks to the backend only through [`Backend`]. [`HttpBackend`]
//! is the production implementation; `testing::FakeBackend` keeps everything
//! in memory.

pub mod http;
pub mod wire;

pub use http::HttpBackend;

use crate::audio::AudioPayload;
use crate::conversation::ConversationTurn;
use crate::error::Result;
use crate::settings::{Config, ModelDescriptor};
use std::future::Future;
use std::time::Duration;

/// Fallback shown when an audio submission is rejected without a reason
pub const AUDIO_REJECTED_FALLBACK: &str = "Failed to process recording";
/// Fallback shown when a text submission is rejected without a reason
pub const TEXT_REJECTED_FALLBACK: &str = "Failed to process text";

/// Operations the backend exposes
///
/// Every method resolves to `BackendRejected` when the backend answers with
/// `success: false` and to `NetworkFailure` when it cannot be reached.
pub trait Backend {
    /// Fetch the full conversation log in server order
    fn list_turns(&self) -> impl Future<Output = Result<Vec<ConversationTurn>>>;

    /// Delete the conversation log
    fn clear_turns(&self) -> impl Future<Output = Result<()>>;

    /// Submit a recorded turn
    fn submit_audio(&self, payload: AudioPayload) -> impl Future<Output = Result<()>>;

    /// Submit a typed turn
    fn submit_text(&self, text: String) -> impl Future<Output = Result<()>>;

    /// Fetch the model catalogue
    fn list_models(&self) -> impl Future<Output = Result<Vec<ModelDescriptor>>>;

    /// Fetch the active configuration
    fn get_config(&self) -> impl Future<Output = Result<Config>>;

    /// Store a configuration; the backend may echo it back
    fn save_config(&self, config: Config) -> impl Future<Output = Result<Option<Config>>>;

    /// Restore and return the default configuration
    fn reset_config(&self) -> impl Future<Output = Result<Config>>;
}

/// Run a backend request that must not hold up the client for longer than
/// `limit`
///
/// Submissions are never wrapped in this; they may legitimately take as long
/// as the model needs.
pub(crate) async fn bounded<T>(
    limit: Duration,
    what: &str,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(crate::error::ClientError::NetworkFailure(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}
