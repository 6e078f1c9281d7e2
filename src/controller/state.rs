//! Client state shared between the controller and front-ends
//!
//! The controller is the only writer. Front-ends read through
//! [`SharedState`] or take a [`ClientState`] snapshot, and ask for changes by
//! sending a [`Command`].

use crate::conversation::ConversationLog;
use crate::settings::{ConfigPatch, SettingsSlots};
use parking_lot::RwLock;
use std::sync::Arc;

/// Where the record/submit cycle currently is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Ready for a new turn
    #[default]
    Idle,
    /// Microphone open, counter running
    Recording,
    /// A turn is with the backend
    Processing,
}

impl Phase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Phase::Recording)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Phase::Processing)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Recording => write!(f, "Recording"),
            Phase::Processing => write!(f, "Processing"),
        }
    }
}

/// Which screen the front-end shows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Chat,
    Settings,
}

/// Record/submit cycle and the feedback around it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InteractionState {
    pub phase: Phase,
    /// Whole seconds since recording started; 0 outside Recording
    pub recording_seconds: u32,
    /// Last user-visible failure
    pub error_message: Option<String>,
    /// Last acknowledgment, e.g. "Settings saved"
    pub notice: Option<String>,
    pub active_view: View,
    /// Text typed but not yet submitted
    pub text_draft: String,
}

impl InteractionState {
    pub fn can_record(&self) -> bool {
        !self.phase.is_processing()
    }

    pub fn can_submit_text(&self) -> bool {
        self.phase.is_idle() && !self.text_draft.trim().is_empty()
    }
}

/// Everything a front-end renders
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientState {
    pub interaction: InteractionState,
    pub log: ConversationLog,
    pub settings: SettingsSlots,
}

/// Thread-safe handle on the [`ClientState`]
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<ClientState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, ClientState> {
        self.inner.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, ClientState> {
        self.inner.write()
    }

    /// Copy of the current state (no lock held after return)
    pub fn snapshot(&self) -> ClientState {
        self.inner.read().clone()
    }

    // === Convenience read methods ===

    pub fn phase(&self) -> Phase {
        self.inner.read().interaction.phase
    }

    pub fn recording_seconds(&self) -> u32 {
        self.inner.read().interaction.recording_seconds
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.read().interaction.error_message.clone()
    }

    pub fn notice(&self) -> Option<String> {
        self.inner.read().interaction.notice.clone()
    }

    pub fn active_view(&self) -> View {
        self.inner.read().interaction.active_view
    }

    pub fn turn_count(&self) -> usize {
        self.inner.read().log.len()
    }
}

/// Requests a front-end can make
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    StartRecording,
    StopRecording,
    /// The single record button: start when idle, stop when recording
    ToggleRecording,
    /// Stop recording without submitting anything
    CancelRecording,
    SetTextDraft(String),
    /// Submit the current text draft
    SubmitText,
    SwitchView(View),
    EditSettings(ConfigPatch),
    SaveSettings,
    ResetSettings { confirmed: bool },
    ClearHistory { confirmed: bool },
    /// Fetch the log now instead of waiting for the next poll
    Refresh,
    Shutdown,
}

/// Notifications for front-ends
///
/// State should be read from [`SharedState`]; events only say when to look.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged,
    /// New turns appeared at the end of the log
    ScrollToLatest,
    Notice(String),
    Error(String),
    Shutdown,
}
