//! Keeps the local conversation log in step with the backend
//!
//! The backend owns the log; this side only ever replaces its copy with
//! whatever the backend returns. Fetches run on a cadence that tightens
//! while a submission is outstanding.

use super::log::LogChange;
use super::types::ConversationTurn;
use crate::api::{bounded, Backend};
use crate::config::ClientConfig;
use crate::controller::SharedState;
use crate::error::Result;
use futures::future::{FutureExt, LocalBoxFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

type Fetch = LocalBoxFuture<'static, Result<Vec<ConversationTurn>>>;

pub struct ConversationSync<B> {
    backend: Arc<B>,
    state: SharedState,
    fast_poll: Duration,
    slow_poll: Duration,
    poll_timeout: Duration,
    processing: bool,
    /// Created lazily so the cadence always matches `processing`
    interval: Option<Interval>,
    pending: Option<Fetch>,
    last_refresh: Option<Instant>,
}

impl<B: Backend + 'static> ConversationSync<B> {
    pub fn new(backend: Arc<B>, state: SharedState, config: &ClientConfig) -> Self {
        Self {
            backend,
            state,
            fast_poll: config.fast_poll,
            slow_poll: config.slow_poll,
            poll_timeout: config.poll_timeout,
            processing: false,
            interval: None,
            pending: None,
            last_refresh: None,
        }
    }

    /// Current poll period
    pub fn cadence(&self) -> Duration {
        if self.processing {
            self.fast_poll
        } else {
            self.slow_poll
        }
    }

    /// Switch cadence when the processing flag changes
    ///
    /// The old timer is dropped before the new one exists, so two cadences
    /// never run at once.
    pub fn rearm(&mut self, processing: bool) {
        if self.processing == processing {
            return;
        }
        self.processing = processing;
        self.interval = None;
        debug!("Conversation poll re-armed at {:?}", self.cadence());
    }

    /// Whether a background fetch is in flight
    pub fn is_fetching(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the next background fetch to finish
    ///
    /// Ticks are only taken while no fetch is in flight, so a slow backend
    /// never has two background fetches stacked up. Cancellation safe:
    /// the in-flight fetch and the timer survive a dropped call.
    pub async fn next_fetch(&mut self) -> Result<Vec<ConversationTurn>> {
        loop {
            if let Some(fetch) = self.pending.as_mut() {
                let outcome = fetch.await;
                self.pending = None;
                return outcome;
            }

            if self.interval.is_none() {
                self.interval = Some(self.new_interval());
            }
            if let Some(interval) = self.interval.as_mut() {
                interval.tick().await;
            }
            self.pending = Some(self.fetch());
        }
    }

    /// Fold a background fetch into the log
    ///
    /// A failed fetch keeps whatever the log held.
    pub fn apply(&mut self, outcome: Result<Vec<ConversationTurn>>) -> Option<LogChange> {
        match outcome {
            Ok(turns) => {
                let change = self.state.write().log.replace(turns);
                if change.changed {
                    debug!("Conversation log now has {} turns", change.len);
                }
                Some(change)
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                None
            }
        }
    }

    /// Fetch right away, outside the cadence
    ///
    /// Bounded by the poll timeout like background fetches. Any background
    /// fetch still in flight is dropped first; its answer could predate this
    /// one and must not overwrite it.
    pub async fn refresh_now(&mut self) -> Result<LogChange> {
        if self.pending.take().is_some() {
            debug!("Dropped in-flight background fetch");
        }

        let turns = bounded(
            self.poll_timeout,
            "Conversation fetch",
            self.backend.list_turns(),
        )
        .await?;
        self.last_refresh = Some(Instant::now());
        if let Some(interval) = self.interval.as_mut() {
            interval.reset();
        }
        Ok(self.state.write().log.replace(turns))
    }

    /// Delete the log on the backend, then locally
    pub async fn clear(&mut self) -> Result<LogChange> {
        bounded(self.poll_timeout, "Clearing history", self.backend.clear_turns()).await?;
        self.pending = None;
        info!("Conversation history cleared");
        Ok(self.state.write().log.clear())
    }

    /// Stop polling for good
    pub fn shutdown(&mut self) {
        self.interval = None;
        self.pending = None;
    }

    fn new_interval(&self) -> Interval {
        let period = self.cadence();
        let now = Instant::now();
        // Skip the immediate tick if a forced refresh just happened
        let start = match self.last_refresh {
            Some(at) if now.duration_since(at) < period => at + period,
            _ => now,
        };
        let mut interval = time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn fetch(&self) -> Fetch {
        let backend = Arc::clone(&self.backend);
        let limit = self.poll_timeout;
        async move { bounded(limit, "Conversation fetch", backend.list_turns()).await }
            .boxed_local()
    }
}
