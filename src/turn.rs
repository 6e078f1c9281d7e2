//! Turn submission
//!
//! At most one submission is outstanding; the submitter refuses a second
//! one itself instead of trusting callers to check first.

use crate::api::Backend;
use crate::audio::AudioPayload;
use crate::error::{ClientError, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One user turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    Audio(AudioPayload),
    Text(String),
}

impl TurnInput {
    pub fn kind(&self) -> TurnKind {
        match self {
            TurnInput::Audio(_) => TurnKind::Audio,
            TurnInput::Text(_) => TurnKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Audio,
    Text,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnKind::Audio => write!(f, "audio"),
            TurnKind::Text => write!(f, "text"),
        }
    }
}

struct InFlight {
    kind: TurnKind,
    started_at: Instant,
    request: LocalBoxFuture<'static, Result<()>>,
}

/// Sends user turns to the backend, one at a time
pub struct TurnSubmitter<B> {
    backend: Arc<B>,
    in_flight: Option<InFlight>,
}

impl<B: Backend + 'static> TurnSubmitter<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            in_flight: None,
        }
    }

    /// Start submitting a turn
    ///
    /// The request only makes progress while [`completion`](Self::completion)
    /// is being awaited.
    ///
    /// # Errors
    /// `Busy` if a submission is already outstanding
    pub fn begin(&mut self, input: TurnInput) -> Result<()> {
        if let Some(current) = &self.in_flight {
            warn!("Rejecting {} turn, {} turn still outstanding", input.kind(), current.kind);
            return Err(ClientError::Busy);
        }

        let kind = input.kind();
        let backend = Arc::clone(&self.backend);
        let request = async move {
            match input {
                TurnInput::Audio(payload) => backend.submit_audio(payload).await,
                TurnInput::Text(text) => backend.submit_text(text).await,
            }
        }
        .boxed_local();

        info!("Submitting {} turn", kind);
        self.in_flight = Some(InFlight {
            kind,
            started_at: Instant::now(),
            request,
        });
        Ok(())
    }

    /// Wait for the outstanding submission; pends forever when there is none
    ///
    /// Cancellation safe: dropping this future leaves the submission
    /// outstanding.
    pub async fn completion(&mut self) -> (TurnKind, Result<()>) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };

        let outcome = (&mut in_flight.request).await;
        let kind = in_flight.kind;
        let elapsed = in_flight.started_at.elapsed();
        self.in_flight = None;

        match &outcome {
            Ok(()) => info!("{} turn accepted after {:.1}s", kind, elapsed.as_secs_f32()),
            Err(e) => warn!("{} turn failed after {:.1}s: {}", kind, elapsed.as_secs_f32(), e),
        }
        (kind, outcome)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn outstanding(&self) -> Option<TurnKind> {
        self.in_flight.as_ref().map(|f| f.kind)
    }

    /// Forget the outstanding submission; the request is dropped unsent or
    /// its answer is ignored
    pub fn abandon(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            info!("Abandoning outstanding {} turn", in_flight.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn test_second_submission_is_busy() {
        let backend = Arc::new(FakeBackend::new());
        let mut submitter = TurnSubmitter::new(Arc::clone(&backend));

        submitter.begin(TurnInput::Text("one".into())).unwrap();
        assert_eq!(
            submitter.begin(TurnInput::Text("two".into())),
            Err(ClientError::Busy)
        );

        let (kind, outcome) = submitter.completion().await;
        assert_eq!(kind, TurnKind::Text);
        assert!(outcome.is_ok());
        assert_eq!(backend.submitted_texts(), vec!["one".to_string()]);

        // Free again once the first one finished
        submitter.begin(TurnInput::Text("three".into())).unwrap();
        let _ = submitter.completion().await;
        assert_eq!(backend.submitted_texts().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_reported_not_retried() {
        let backend = Arc::new(FakeBackend::new());
        backend.reject_next_submission(Some("x"));
        let mut submitter = TurnSubmitter::new(Arc::clone(&backend));

        submitter.begin(TurnInput::Text("hello".into())).unwrap();
        let (_, outcome) = submitter.completion().await;
        assert_eq!(outcome, Err(ClientError::BackendRejected("x".into())));
        assert_eq!(backend.calls("submit_text"), 1);
        assert!(!submitter.is_busy());
    }

    #[tokio::test]
    async fn test_submitter_never_touches_the_log() {
        let backend = Arc::new(FakeBackend::new());
        let mut submitter = TurnSubmitter::new(Arc::clone(&backend));

        submitter.begin(TurnInput::Text("hello".into())).unwrap();
        let _ = submitter.completion().await;
        // The backend stored a turn but nothing fetched it
        assert_eq!(backend.calls("list_turns"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_without_submission_pends() {
        let backend = Arc::new(FakeBackend::new());
        let mut submitter = TurnSubmitter::new(backend);

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            submitter.completion(),
        )
        .await;
        assert!(waited.is_err());
    }
}
