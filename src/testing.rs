//! In-memory stand-ins for the backend and the microphone
//!
//! Used by the unit tests, the integration tests and anyone embedding the
//! controller without a server or audio hardware.

use crate::api::{Backend, AUDIO_REJECTED_FALLBACK, TEXT_REJECTED_FALLBACK};
use crate::audio::{AudioPayload, CaptureStream, Microphone};
use crate::conversation::ConversationTurn;
use crate::error::{ClientError, Result};
use crate::settings::{Config, ModelDescriptor};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct BackendState {
    turns: Vec<ConversationTurn>,
    models: Vec<ModelDescriptor>,
    config: Config,
    defaults: Config,
    offline: bool,
    reject_next_submission: Option<String>,
    reject_saves: Option<String>,
    submission_delay: Duration,
    hang_submissions: bool,
    hang_log_fetches: bool,
    settings_delay: Duration,
    submitted_texts: Vec<String>,
    submitted_audio: Vec<AudioPayload>,
    saved_configs: Vec<Config>,
    calls: HashMap<&'static str, usize>,
}

/// Backend kept in memory
///
/// Clones share the same state, so a test can keep one copy for scripting
/// and assertions while the controller owns another.
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Two models, default config on the first one, empty log
    pub fn new() -> Self {
        let defaults = Config::new("gemma2:9b");
        Self {
            inner: Arc::new(Mutex::new(BackendState {
                turns: Vec::new(),
                models: vec![
                    ModelDescriptor::new("gemma2:9b", "Gemma 2 9B"),
                    ModelDescriptor::new("llama3.1:latest", "Llama 3.1 8B"),
                ],
                config: defaults.clone(),
                defaults,
                offline: false,
                reject_next_submission: None,
                reject_saves: None,
                submission_delay: Duration::ZERO,
                hang_submissions: false,
                hang_log_fetches: false,
                settings_delay: Duration::ZERO,
                submitted_texts: Vec::new(),
                submitted_audio: Vec::new(),
                saved_configs: Vec::new(),
                calls: HashMap::new(),
            })),
        }
    }

    pub fn with_turns(self, turns: Vec<ConversationTurn>) -> Self {
        self.set_turns(turns);
        self
    }

    pub fn with_models(self, models: Vec<ModelDescriptor>) -> Self {
        self.inner.lock().models = models;
        self
    }

    /// Replace the stored log, as if another client had written to it
    pub fn set_turns(&self, turns: Vec<ConversationTurn>) {
        self.inner.lock().turns = turns;
    }

    pub fn push_turn(&self, turn: ConversationTurn) {
        self.inner.lock().turns.push(turn);
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.inner.lock().turns.clone()
    }

    /// Make every request fail with `NetworkFailure` until [`go_online`](Self::go_online)
    pub fn go_offline(&self) {
        self.inner.lock().offline = true;
    }

    pub fn go_online(&self) {
        self.inner.lock().offline = false;
    }

    /// Answer the next submission with `success: false`; `None` omits the reason
    pub fn reject_next_submission(&self, error: Option<&str>) {
        self.inner.lock().reject_next_submission = Some(error.unwrap_or("").to_string());
    }

    /// Answer every save with `success: false`
    pub fn reject_saves(&self, error: &str) {
        self.inner.lock().reject_saves = Some(error.to_string());
    }

    /// Time each submission takes before answering
    pub fn set_submission_delay(&self, delay: Duration) {
        self.inner.lock().submission_delay = delay;
    }

    /// Never answer submissions
    pub fn hang_submissions(&self) {
        self.inner.lock().hang_submissions = true;
    }

    /// Never answer conversation fetches
    pub fn hang_log_fetches(&self) {
        self.inner.lock().hang_log_fetches = true;
    }

    /// Time each settings save takes before answering
    pub fn set_settings_delay(&self, delay: Duration) {
        self.inner.lock().settings_delay = delay;
    }

    pub fn set_config(&self, config: Config) {
        self.inner.lock().config = config;
    }

    pub fn stored_config(&self) -> Config {
        self.inner.lock().config.clone()
    }

    pub fn saved_configs(&self) -> Vec<Config> {
        self.inner.lock().saved_configs.clone()
    }

    pub fn submitted_texts(&self) -> Vec<String> {
        self.inner.lock().submitted_texts.clone()
    }

    pub fn submitted_audio(&self) -> Vec<AudioPayload> {
        self.inner.lock().submitted_audio.clone()
    }

    /// How often an operation was requested, by trait method name
    pub fn calls(&self, operation: &str) -> usize {
        self.inner.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Total number of requests of any kind
    pub fn total_calls(&self) -> usize {
        self.inner.lock().calls.values().sum()
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        let mut state = self.inner.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        if state.offline {
            return Err(ClientError::NetworkFailure("connection refused".to_string()));
        }
        Ok(())
    }

    async fn wait_for_answer(&self) {
        let (delay, hang) = {
            let state = self.inner.lock();
            (state.submission_delay, state.hang_submissions)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_rejection(&self, fallback: &str) -> Result<()> {
        match self.inner.lock().reject_next_submission.take() {
            Some(reason) if reason.trim().is_empty() => {
                Err(ClientError::BackendRejected(fallback.to_string()))
            }
            Some(reason) => Err(ClientError::BackendRejected(reason)),
            None => Ok(()),
        }
    }
}

impl Backend for FakeBackend {
    async fn list_turns(&self) -> Result<Vec<ConversationTurn>> {
        self.record("list_turns")?;
        let hang = self.inner.lock().hang_log_fetches;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self.turns())
    }

    async fn clear_turns(&self) -> Result<()> {
        self.record("clear_turns")?;
        self.inner.lock().turns.clear();
        Ok(())
    }

    async fn submit_audio(&self, payload: AudioPayload) -> Result<()> {
        self.record("submit_audio")?;
        self.wait_for_answer().await;
        self.take_rejection(AUDIO_REJECTED_FALLBACK)?;

        let mut state = self.inner.lock();
        let input = format!("[{:.1}s of audio]", payload.duration.as_secs_f32());
        state.turns.push(ConversationTurn::new(input, "I heard you."));
        state.submitted_audio.push(payload);
        Ok(())
    }

    async fn submit_text(&self, text: String) -> Result<()> {
        self.record("submit_text")?;
        self.wait_for_answer().await;
        self.take_rejection(TEXT_REJECTED_FALLBACK)?;

        let mut state = self.inner.lock();
        let reply = format!("You said: {}", text);
        state.turns.push(ConversationTurn::new(text.clone(), reply));
        state.submitted_texts.push(text);
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.record("list_models")?;
        Ok(self.inner.lock().models.clone())
    }

    async fn get_config(&self) -> Result<Config> {
        self.record("get_config")?;
        Ok(self.stored_config())
    }

    async fn save_config(&self, config: Config) -> Result<Option<Config>> {
        self.record("save_config")?;
        let delay = self.inner.lock().settings_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.inner.lock();
        if let Some(reason) = &state.reject_saves {
            return Err(ClientError::BackendRejected(reason.clone()));
        }
        state.saved_configs.push(config.clone());
        state.config = config;
        Ok(None)
    }

    async fn reset_config(&self) -> Result<Config> {
        self.record("reset_config")?;
        let mut state = self.inner.lock();
        state.config = state.defaults.clone();
        Ok(state.config.clone())
    }
}

#[derive(Default)]
struct MicrophoneState {
    sender: Option<Sender<Vec<f32>>>,
    live: usize,
    opened: usize,
    released: usize,
    deny: bool,
    broken: bool,
}

/// Microphone fed by the test
///
/// Samples passed to [`deliver`](Self::deliver) reach the open stream, if
/// any. Clones share state.
#[derive(Clone)]
pub struct FakeMicrophone {
    sample_rate: u32,
    state: Arc<Mutex<MicrophoneState>>,
}

impl FakeMicrophone {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(MicrophoneState::default())),
        }
    }

    /// Refuse access on every later open
    pub fn deny_access(&self) {
        self.state.lock().deny = true;
    }

    /// Fail every later open with a hardware error
    pub fn break_device(&self) {
        self.state.lock().broken = true;
    }

    /// Push samples into the open stream; dropped when none is open
    pub fn deliver(&self, samples: &[f32]) {
        if let Some(sender) = &self.state.lock().sender {
            let _ = sender.send(samples.to_vec());
        }
    }

    /// Streams currently holding the device
    pub fn live_streams(&self) -> usize {
        self.state.lock().live
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn released(&self) -> usize {
        self.state.lock().released
    }
}

/// Stream handed out by [`FakeMicrophone`]
pub struct FakeStream {
    sample_rate: u32,
    state: Arc<Mutex<MicrophoneState>>,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.sender = None;
        state.live -= 1;
        state.released += 1;
    }
}

impl Microphone for FakeMicrophone {
    type Stream = FakeStream;

    fn open(&mut self, fragments: Sender<Vec<f32>>) -> Result<FakeStream> {
        let mut state = self.state.lock();
        if state.deny {
            return Err(ClientError::PermissionDenied(
                "Microphone access was denied".to_string(),
            ));
        }
        if state.broken {
            return Err(ClientError::DeviceError("No input device available".to_string()));
        }

        state.sender = Some(fragments);
        state.live += 1;
        state.opened += 1;
        Ok(FakeStream {
            sample_rate: self.sample_rate,
            state: Arc::clone(&self.state),
        })
    }
}
