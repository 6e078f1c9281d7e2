//! Interaction controller
//!
//! Owns the record/submit cycle and coordinates the components around it:
//! - [`AudioCapture`] for the microphone
//! - [`TurnSubmitter`] for outstanding turns
//! - [`ConversationSync`] for the log and its poll cadence
//! - [`SettingsEditor`] for the model configuration
//!
//! Everything runs on one task. [`InteractionController::next_wake`] waits for
//! whichever of the submission, the poll and the recording counter is due
//! first, and [`InteractionController::handle`] applies it. Front-ends talk to
//! a running controller through a [`ClientHandle`].

pub mod state;

pub use state::{ClientEvent, ClientState, Command, InteractionState, Phase, SharedState, View};

use crate::api::Backend;
use crate::audio::{AudioCapture, Microphone};
use crate::config::ClientConfig;
use crate::conversation::{ConversationSync, ConversationTurn, LogChange};
use crate::error::{ClientError, Result};
use crate::settings::{ConfigPatch, SettingsEditor};
use crate::turn::{TurnInput, TurnKind, TurnSubmitter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Something the controller has to react to
#[derive(Debug)]
pub enum Wake {
    /// A command from a front-end; `None` once every handle is gone
    Command(Option<Command>),
    /// The outstanding submission finished
    TurnFinished(TurnKind, Result<()>),
    /// A background log fetch finished
    Fetched(Result<Vec<ConversationTurn>>),
    /// One more second of recording
    RecordingTick,
}

/// Handle for driving a running controller from a front-end or a test
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    state: SharedState,
}

impl ClientHandle {
    /// Queue a command for the controller
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|e| ClientError::InvalidState(format!("Controller has stopped: {}", e)))
    }

    pub async fn toggle_recording(&self) -> Result<()> {
        self.send(Command::ToggleRecording).await
    }

    /// Replace the text draft and submit it
    pub async fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SetTextDraft(text.into())).await?;
        self.send(Command::SubmitText).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Wait for the next event; `None` once the controller is gone
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Non-blocking event read
    pub fn try_recv_event(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.snapshot()
    }
}

/// Drives the Idle/Recording/Processing cycle
pub struct InteractionController<B: Backend + 'static, M: Microphone> {
    config: ClientConfig,
    state: SharedState,
    capture: AudioCapture<M>,
    submitter: TurnSubmitter<B>,
    sync: ConversationSync<B>,
    settings: SettingsEditor<B>,
    /// Present only while recording
    recording_ticker: Option<Interval>,
    recording_started: Option<Instant>,
    commands: Option<mpsc::Receiver<Command>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    disposed: bool,
}

impl<B: Backend + 'static, M: Microphone> InteractionController<B, M> {
    /// Create a controller and the handle front-ends drive it with
    ///
    /// # Errors
    /// `ConfigError` if `config` does not validate
    pub fn new(config: ClientConfig, backend: B, microphone: M) -> Result<(Self, ClientHandle)> {
        config.validate()?;

        let backend = Arc::new(backend);
        let state = SharedState::new();
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            capture: AudioCapture::new(microphone),
            submitter: TurnSubmitter::new(Arc::clone(&backend)),
            sync: ConversationSync::new(Arc::clone(&backend), state.clone(), &config),
            settings: SettingsEditor::new(backend, state.clone())
                .with_request_timeout(config.poll_timeout),
            config,
            state: state.clone(),
            recording_ticker: None,
            recording_started: None,
            commands: Some(command_rx),
            events: event_tx,
            disposed: false,
        };
        let handle = ClientHandle {
            commands: command_tx,
            events: event_rx,
            state,
        };
        Ok((controller, handle))
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn microphone(&self) -> &M {
        self.capture.microphone()
    }

    /// Load models, config and the log
    ///
    /// Failures here are only logged; the client starts with whatever
    /// loaded and the poll fills the log in later.
    pub async fn initialize(&mut self) {
        info!("Initializing client against {}", self.config.base_url);
        if let Err(e) = self.settings.load_models().await {
            warn!("Failed to load models: {}", e);
        }
        if let Err(e) = self.settings.load().await {
            warn!("Failed to load config: {}", e);
        }
        match self.sync.refresh_now().await {
            Ok(change) => self.log_changed(change),
            Err(e) => warn!("Failed to load conversations: {}", e),
        }
        self.emit(ClientEvent::StateChanged);
    }

    // === Recording ===

    /// Open the microphone and start counting
    ///
    /// # Errors
    /// `Busy` while a turn is processing, `InvalidState` if already
    /// recording, the device error otherwise. The phase is unchanged on
    /// error and the failure is shown in the error slot.
    pub fn start_recording(&mut self) -> Result<()> {
        match self.phase() {
            Phase::Processing => return Err(self.surface(ClientError::Busy)),
            Phase::Recording => {
                return Err(self.surface(ClientError::InvalidState(
                    "Already recording".to_string(),
                )))
            }
            Phase::Idle => {}
        }

        if let Err(e) = self.capture.start() {
            return Err(self.surface(e));
        }
        self.state.write().interaction.error_message = None;
        self.set_phase(Phase::Recording);
        Ok(())
    }

    /// Close the microphone and submit the recording
    pub fn stop_recording(&mut self) -> Result<()> {
        if !self.phase().is_recording() {
            return Err(self.surface(ClientError::InvalidState(
                "Not recording".to_string(),
            )));
        }

        let payload = match self.capture.stop() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.set_phase(Phase::Idle);
                return Err(self.surface(ClientError::InvalidState(
                    "No active recording".to_string(),
                )));
            }
            Err(e) => {
                self.set_phase(Phase::Idle);
                return Err(self.surface(e));
            }
        };

        if let Err(e) = self.submitter.begin(TurnInput::Audio(payload)) {
            self.set_phase(Phase::Idle);
            return Err(self.surface(e));
        }
        self.set_phase(Phase::Processing);
        Ok(())
    }

    /// Start when idle, stop when recording
    pub fn toggle_recording(&mut self) -> Result<()> {
        if self.phase().is_recording() {
            self.stop_recording()
        } else {
            self.start_recording()
        }
    }

    /// Drop the recording without submitting it
    pub fn cancel_recording(&mut self) {
        if !self.phase().is_recording() {
            return;
        }
        self.capture.cancel();
        self.set_phase(Phase::Idle);
    }

    // === Text ===

    pub fn set_text_draft(&mut self, text: impl Into<String>) {
        self.state.write().interaction.text_draft = text.into();
        self.emit(ClientEvent::StateChanged);
    }

    /// Submit the text draft
    ///
    /// Returns `Ok(false)` without contacting the backend when the draft
    /// is blank.
    pub fn submit_text_draft(&mut self) -> Result<bool> {
        let text = self.state.read().interaction.text_draft.trim().to_string();
        if text.is_empty() {
            debug!("Ignoring blank text submission");
            return Ok(false);
        }

        match self.phase() {
            Phase::Processing => return Err(self.surface(ClientError::Busy)),
            Phase::Recording => {
                return Err(self.surface(ClientError::InvalidState(
                    "Stop recording before sending text".to_string(),
                )))
            }
            Phase::Idle => {}
        }

        if let Err(e) = self.submitter.begin(TurnInput::Text(text)) {
            return Err(self.surface(e));
        }
        self.state.write().interaction.error_message = None;
        self.set_phase(Phase::Processing);
        Ok(true)
    }

    /// Replace the draft with `text` and submit it
    pub fn submit_text(&mut self, text: impl Into<String>) -> Result<bool> {
        self.state.write().interaction.text_draft = text.into();
        self.submit_text_draft()
    }

    // === Views and settings ===

    /// Leaving the settings view throws away unsaved edits
    pub fn switch_view(&mut self, view: View) {
        let previous = self.state.read().interaction.active_view;
        if previous == view {
            return;
        }
        if previous == View::Settings {
            self.settings.discard_draft();
        }
        self.state.write().interaction.active_view = view;
        debug!("View {:?} -> {:?}", previous, view);
        self.emit(ClientEvent::StateChanged);
    }

    pub fn edit_settings(&mut self, patch: &ConfigPatch) -> Result<()> {
        if let Err(e) = self.settings.edit(patch) {
            return Err(self.surface(e));
        }
        self.emit(ClientEvent::StateChanged);
        Ok(())
    }

    pub async fn save_settings(&mut self) -> Result<()> {
        match self.settings.save().await {
            Ok(()) => {
                self.acknowledge("Settings saved");
                Ok(())
            }
            Err(e) => Err(self.surface(e)),
        }
    }

    /// Returns whether anything was reset
    pub async fn reset_settings(&mut self, confirmed: bool) -> Result<bool> {
        match self.settings.reset_to_defaults(confirmed).await {
            Ok(true) => {
                self.acknowledge("Settings reset to defaults");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => Err(self.surface(e)),
        }
    }

    /// Returns whether anything was cleared
    pub async fn clear_history(&mut self, confirmed: bool) -> Result<bool> {
        if !confirmed {
            debug!("Clear history not confirmed");
            return Ok(false);
        }
        match self.sync.clear().await {
            Ok(change) => {
                self.log_changed(change);
                self.acknowledge("Conversation history cleared");
                Ok(true)
            }
            Err(e) => Err(self.surface(e)),
        }
    }

    /// Fetch the log now
    pub async fn refresh_now(&mut self) -> Result<()> {
        match self.sync.refresh_now().await {
            Ok(change) => {
                self.log_changed(change);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                Err(e)
            }
        }
    }

    // === Event loop ===

    /// Wait for the submission, the poll or the recording counter
    ///
    /// Only cancellation-safe futures are awaited here, so this can sit in
    /// a `select!` next to a command channel.
    pub async fn next_wake(&mut self) -> Wake {
        let ticker = &mut self.recording_ticker;
        tokio::select! {
            (kind, outcome) = self.submitter.completion() => Wake::TurnFinished(kind, outcome),
            outcome = self.sync.next_fetch() => Wake::Fetched(outcome),
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => Wake::RecordingTick,
        }
    }

    /// Apply one wake-up
    pub async fn handle(&mut self, wake: Wake) {
        match wake {
            Wake::Command(Some(command)) => self.dispatch(command).await,
            Wake::Command(None) => debug!("Command channel closed"),
            Wake::TurnFinished(kind, outcome) => self.finish_turn(kind, outcome).await,
            Wake::Fetched(outcome) => {
                if let Some(change) = self.sync.apply(outcome) {
                    self.log_changed(change);
                }
            }
            Wake::RecordingTick => self.tick_recording(),
        }
    }

    /// Wait for and apply one wake-up
    pub async fn step(&mut self) {
        let wake = self.next_wake().await;
        self.handle(wake).await;
    }

    /// Step until no turn is processing
    pub async fn settle(&mut self) {
        while self.phase().is_processing() {
            self.step().await;
        }
    }

    /// Serve commands until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands.take() else {
            warn!("Controller is already running");
            return;
        };

        self.initialize().await;
        info!("Controller running");

        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                wake = self.next_wake() => wake,
            };
            match wake {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => break,
                wake => self.handle(wake).await,
            }
        }

        self.dispose();
    }

    /// Release the microphone and stop all background work
    ///
    /// An outstanding submission is abandoned; whatever the backend does
    /// with it shows up in the log on the next start.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.capture.cancel();
        self.recording_ticker = None;
        self.recording_started = None;
        self.submitter.abandon();
        self.sync.shutdown();
        info!("Controller disposed");
        self.emit(ClientEvent::Shutdown);
    }

    async fn dispatch(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        let outcome = match command {
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::ToggleRecording => self.toggle_recording(),
            Command::CancelRecording => {
                self.cancel_recording();
                Ok(())
            }
            Command::SetTextDraft(text) => {
                self.set_text_draft(text);
                Ok(())
            }
            Command::SubmitText => self.submit_text_draft().map(drop),
            Command::SwitchView(view) => {
                self.switch_view(view);
                Ok(())
            }
            Command::EditSettings(patch) => self.edit_settings(&patch),
            Command::SaveSettings => self.save_settings().await,
            Command::ResetSettings { confirmed } => self.reset_settings(confirmed).await.map(drop),
            Command::ClearHistory { confirmed } => self.clear_history(confirmed).await.map(drop),
            Command::Refresh => self.refresh_now().await,
            Command::Shutdown => {
                self.dispose();
                Ok(())
            }
        };
        if let Err(e) = outcome {
            debug!("Command failed: {}", e);
        }
    }

    async fn finish_turn(&mut self, kind: TurnKind, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                {
                    let mut state = self.state.write();
                    state.interaction.error_message = None;
                    if kind == TurnKind::Text {
                        state.interaction.text_draft.clear();
                    }
                }
                match self.sync.refresh_now().await {
                    Ok(change) => self.log_changed(change),
                    Err(e) => warn!("Failed to load conversations: {}", e),
                }
            }
            Err(e) => {
                self.surface(e);
            }
        }
        self.set_phase(Phase::Idle);
    }

    fn tick_recording(&mut self) {
        let samples = self.capture.buffered_samples();
        // Counted from the start so ticks missed while the loop was busy
        // still show up
        let seconds = self
            .recording_started
            .map(|at| u32::try_from(at.elapsed().as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0);
        self.state.write().interaction.recording_seconds = seconds;
        debug!("Recording for {}s ({} samples)", seconds, samples);
        self.emit(ClientEvent::StateChanged);
    }

    fn set_phase(&mut self, phase: Phase) {
        let previous = {
            let mut state = self.state.write();
            let previous = state.interaction.phase;
            state.interaction.phase = phase;
            if !phase.is_recording() {
                state.interaction.recording_seconds = 0;
            }
            previous
        };

        if phase.is_recording() && !previous.is_recording() {
            let tick = self.config.recording_tick;
            let now = Instant::now();
            let mut ticker = time::interval_at(now + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.recording_ticker = Some(ticker);
            self.recording_started = Some(now);
        } else if !phase.is_recording() {
            self.recording_ticker = None;
            self.recording_started = None;
        }

        if previous.is_processing() != phase.is_processing() {
            self.sync.rearm(phase.is_processing());
        }

        if previous != phase {
            info!("{} -> {}", previous, phase);
        }
        self.emit(ClientEvent::StateChanged);
    }

    fn log_changed(&mut self, change: LogChange) {
        if change.grew() {
            self.emit(ClientEvent::ScrollToLatest);
        }
        if change.changed {
            self.emit(ClientEvent::StateChanged);
        }
    }

    /// Put a failure in the error slot and hand it back
    fn surface(&mut self, error: ClientError) -> ClientError {
        let message = error.user_message();
        warn!("{}", error);
        self.state.write().interaction.error_message = Some(message.clone());
        self.emit(ClientEvent::Error(message));
        self.emit(ClientEvent::StateChanged);
        error
    }

    fn acknowledge(&mut self, message: &str) {
        info!("{}", message);
        self.state.write().interaction.notice = Some(message.to_string());
        self.emit(ClientEvent::Notice(message.to_string()));
        self.emit(ClientEvent::StateChanged);
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl<B: Backend + 'static, M: Microphone> Drop for InteractionController<B, M> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeMicrophone};
    use std::time::Duration;

    fn controller() -> (
        InteractionController<FakeBackend, FakeMicrophone>,
        ClientHandle,
        FakeBackend,
        FakeMicrophone,
    ) {
        let backend = FakeBackend::new();
        let mic = FakeMicrophone::new(16000);
        let (controller, handle) =
            InteractionController::new(ClientConfig::default(), backend.clone(), mic.clone())
                .unwrap();
        (controller, handle, backend, mic)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig::default()
            .with_poll_intervals(Duration::ZERO, Duration::from_secs(3));
        let outcome =
            InteractionController::new(config, FakeBackend::new(), FakeMicrophone::new(16000));
        assert!(matches!(outcome, Err(ClientError::ConfigError(_))));

        let mut config = ClientConfig::default();
        config.recording_tick = Duration::ZERO;
        let outcome =
            InteractionController::new(config, FakeBackend::new(), FakeMicrophone::new(16000));
        assert!(matches!(outcome, Err(ClientError::ConfigError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_stop_submits_audio() {
        let (mut controller, _handle, backend, mic) = controller();
        controller.initialize().await;

        controller.start_recording().unwrap();
        assert_eq!(controller.phase(), Phase::Recording);
        mic.deliver(&[0.1; 1600]);

        controller.stop_recording().unwrap();
        assert_eq!(controller.phase(), Phase::Processing);
        assert_eq!(mic.live_streams(), 0);

        controller.settle().await;
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(backend.submitted_audio().len(), 1);
        assert_eq!(controller.state().turn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_microphone_stays_idle() {
        let (mut controller, _handle, _backend, mic) = controller();
        mic.deny_access();

        let err = controller.start_recording().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller
            .state()
            .error_message()
            .unwrap()
            .starts_with("Microphone access denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_refused_while_processing() {
        let (mut controller, _handle, backend, mic) = controller();
        backend.hang_submissions();

        controller.submit_text("hello").unwrap();
        assert_eq!(controller.start_recording(), Err(ClientError::Busy));
        assert_eq!(mic.opened(), 0);
        assert_eq!(controller.phase(), Phase::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_refused_while_recording() {
        let (mut controller, _handle, backend, _mic) = controller();
        controller.start_recording().unwrap();

        let err = controller.submit_text("hello").unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
        assert_eq!(controller.phase(), Phase::Recording);
        assert_eq!(backend.calls("submit_text"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_recording() {
        let (mut controller, _handle, backend, mic) = controller();
        controller.start_recording().unwrap();
        mic.deliver(&[0.1; 1600]);

        controller.cancel_recording();
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(mic.live_streams(), 0);
        assert_eq!(backend.calls("submit_audio"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_settings_discards_draft() {
        let (mut controller, _handle, _backend, _mic) = controller();
        controller.initialize().await;
        controller.switch_view(View::Settings);
        controller
            .edit_settings(&ConfigPatch::context("Answer in French."))
            .unwrap();

        controller.switch_view(View::Chat);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.settings.draft().unwrap().context, "");
        assert_eq!(snapshot.interaction.active_view, View::Chat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_emits_notice() {
        let (mut controller, mut handle, _backend, _mic) = controller();
        controller.initialize().await;
        controller.edit_settings(&ConfigPatch::temperature(0.3)).unwrap();
        controller.save_settings().await.unwrap();

        let mut notices = Vec::new();
        while let Some(event) = handle.try_recv_event() {
            if let ClientEvent::Notice(text) = event {
                notices.push(text);
            }
        }
        assert_eq!(notices, vec!["Settings saved".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_clear_is_noop() {
        let (mut controller, _handle, backend, _mic) = controller();
        backend.push_turn(ConversationTurn::new("a", "1"));
        controller.initialize().await;

        assert!(!controller.clear_history(false).await.unwrap());
        assert_eq!(backend.calls("clear_turns"), 0);
        assert_eq!(controller.state().turn_count(), 1);

        assert!(controller.clear_history(true).await.unwrap());
        assert_eq!(controller.state().turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_releases_microphone() {
        let (mut controller, mut handle, _backend, mic) = controller();
        controller.start_recording().unwrap();
        assert_eq!(mic.live_streams(), 1);

        controller.dispose();
        assert_eq!(mic.live_streams(), 0);

        let mut saw_shutdown = false;
        while let Some(event) = handle.try_recv_event() {
            saw_shutdown |= event == ClientEvent::Shutdown;
        }
        assert!(saw_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_serves_handle_commands() {
        let (controller, mut handle, backend, _mic) = controller();

        let frontend = async move {
            handle.submit_text("hi there").await.unwrap();
            loop {
                match handle.next_event().await {
                    Some(ClientEvent::ScrollToLatest) => break,
                    Some(_) => continue,
                    None => panic!("controller stopped early"),
                }
            }
            handle.shutdown().await.unwrap();
            handle
        };

        let ((), handle) = tokio::join!(controller.run(), frontend);
        assert_eq!(backend.submitted_texts(), vec!["hi there".to_string()]);
        assert_eq!(handle.state().turn_count(), 1);
        assert_eq!(handle.state().phase(), Phase::Idle);
    }
}
