//! The per-agent worker: generate, reveal, synthesize, wait for playback,
//! hand the response to the other side.
//!
//! Each worker runs as its own tokio task. Its only inputs are its inbox
//! (fed by the session's coalescing policy and by the sibling worker) and its
//! cancellation token. Every suspension point selects against the token, so
//! stopping a worker never waits on a provider round-trip.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, SynthesisError};
use crate::events::{SessionEvent, panic_message};
use crate::message::Message;
use crate::model::ModelClient;
use crate::pacing::{TypingPacer, reveal_prefixes};
use crate::participant::Role;
use crate::session::Session;
use crate::tts::TtsClient;

/// Where a worker is in its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Generating,
    Revealing,
    Synthesizing,
    AwaitingPlayback,
    Stopped,
}

/// One queued request for a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub text: String,
    pub ticket: u64,
}

/// Tracks the worker's in-flight generation.
///
/// Every trigger gets a ticket. Cancelling invalidates all tickets handed out
/// so far, which aborts the generation or reveal holding one and makes queued
/// triggers holding one stale.
#[derive(Debug, Default)]
pub struct ProgressMarker {
    state: Mutex<MarkerState>,
    cancelled: Notify,
}

#[derive(Debug, Default)]
struct MarkerState {
    /// Trigger being generated for, then the generated text while revealing.
    text: Option<String>,
    next_ticket: u64,
    live_from: u64,
}

impl ProgressMarker {
    fn lock(&self) -> MutexGuard<'_, MarkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ticket for a trigger that claims the marker right away.
    pub fn issue(&self, text: &str) -> u64 {
        let mut state = self.lock();
        state.text = Some(text.to_string());
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    /// Ticket for a trigger that claims the marker when it is dequeued.
    pub fn ticket(&self) -> u64 {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    pub fn is_live(&self, ticket: u64) -> bool {
        ticket >= self.lock().live_from
    }

    /// Record `text` as the in-flight value for a live ticket.
    pub fn mark(&self, ticket: u64, text: &str) -> bool {
        let mut state = self.lock();
        if ticket < state.live_from {
            return false;
        }
        state.text = Some(text.to_string());
        true
    }

    /// The turn holding `ticket` completed; clear the marker if still ours.
    pub fn finish(&self, ticket: u64) {
        let mut state = self.lock();
        if ticket >= state.live_from {
            state.text = None;
        }
    }

    /// Clear the marker and invalidate every outstanding ticket.
    pub fn cancel(&self) -> Option<String> {
        let previous = {
            let mut state = self.lock();
            state.live_from = state.next_ticket;
            state.text.take()
        };
        self.cancelled.notify_waiters();
        previous
    }

    /// Current in-flight text, if a generation is in progress.
    pub fn current(&self) -> Option<String> {
        self.lock().text.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().text.is_some()
    }

    /// Resolves once `ticket` has been cancelled.
    pub async fn cancelled(&self, ticket: u64) {
        loop {
            let notified = self.cancelled.notified();
            if !self.is_live(ticket) {
                return;
            }
            notified.await;
        }
    }

    fn clear(&self) {
        self.lock().text = None;
    }
}

/// Single-shot, re-armable "playback finished" signal.
#[derive(Debug, Clone)]
pub struct PlaybackGate {
    done: Arc<watch::Sender<bool>>,
}

impl Default for PlaybackGate {
    fn default() -> Self {
        Self {
            done: Arc::new(watch::channel(false).0),
        }
    }
}

impl PlaybackGate {
    pub fn arm(&self) {
        self.done.send_replace(false);
    }

    pub fn signal(&self) {
        self.done.send_replace(true);
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// The session's view of one worker: its inbox, marker, gate and stop token.
#[derive(Clone)]
pub struct AgentHandle {
    role: Role,
    inbox: mpsc::UnboundedSender<Trigger>,
    marker: Arc<ProgressMarker>,
    gate: PlaybackGate,
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
}

impl AgentHandle {
    pub(crate) fn new(role: Role) -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let handle = Self {
            role,
            inbox,
            marker: Arc::new(ProgressMarker::default()),
            gate: PlaybackGate::default(),
            cancel: CancellationToken::new(),
            state: Arc::new(watch::channel(WorkerState::Idle).0),
        };
        (handle, rx)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queue `text` behind whatever the worker already has. Returns the
    /// trigger's ticket, or `None` once the worker is gone.
    pub fn enqueue_input(&self, text: &str) -> Option<u64> {
        let ticket = self.marker.ticket();
        self.send(text, ticket)
    }

    /// Queue `text` and mark the worker as generating for it.
    pub(crate) fn issue(&self, text: &str) -> Option<u64> {
        let ticket = self.marker.issue(text);
        let sent = self.send(text, ticket);
        if sent.is_none() {
            self.marker.clear();
        }
        sent
    }

    fn send(&self, text: &str, ticket: u64) -> Option<u64> {
        self.inbox
            .send(Trigger {
                text: text.to_string(),
                ticket,
            })
            .ok()
            .map(|_| ticket)
    }

    pub fn marker(&self) -> &ProgressMarker {
        &self.marker
    }

    pub fn playback(&self) -> &PlaybackGate {
        &self.gate
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Ask the worker to stop at its next suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Tunables a worker reads on every turn.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub provider_timeout: Duration,
    pub playback_timeout: Duration,
    pub keep_partial_chars: usize,
    pub max_restarts: u32,
}

enum TurnOutcome {
    Continue,
    Stop,
}

enum Reveal {
    Done,
    Interrupted(String),
    Stopped,
}

/// The task body for one side of the debate.
pub struct AgentWorker {
    name: String,
    model: Box<dyn ModelClient>,
    tts: Box<dyn TtsClient>,
    inbox: mpsc::UnboundedReceiver<Trigger>,
    me: AgentHandle,
    sibling: AgentHandle,
    session: Weak<Session>,
    pacer: TypingPacer,
    settings: WorkerSettings,
}

impl AgentWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        model: Box<dyn ModelClient>,
        tts: Box<dyn TtsClient>,
        inbox: mpsc::UnboundedReceiver<Trigger>,
        me: AgentHandle,
        sibling: AgentHandle,
        session: Weak<Session>,
        pacer: TypingPacer,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name,
            model,
            tts,
            inbox,
            me,
            sibling,
            session,
            pacer,
            settings,
        }
    }

    fn role(&self) -> Role {
        self.me.role
    }

    fn set_state(&self, state: WorkerState) {
        self.me.state.send_replace(state);
    }

    /// Process triggers until stopped. A panicking turn is logged and the loop
    /// resumes, up to `max_restarts` times.
    pub async fn run(mut self) {
        let mut panics = 0;
        info!(name = %self.name, "agent worker started");

        loop {
            if self.me.cancel.is_cancelled() {
                break;
            }
            self.set_state(WorkerState::Idle);

            let trigger = tokio::select! {
                biased;
                _ = self.me.cancel.cancelled() => break,
                trigger = self.inbox.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            match AssertUnwindSafe(self.turn(trigger)).catch_unwind().await {
                Ok(TurnOutcome::Continue) => {}
                Ok(TurnOutcome::Stop) => break,
                Err(panic) => {
                    panics += 1;
                    self.me.marker.clear();
                    error!(
                        panic = %panic_message(&panic),
                        restarts = panics,
                        "agent turn panicked"
                    );
                    if panics > self.settings.max_restarts {
                        if let Some(session) = self.session.upgrade() {
                            session.notify(format!("{} stopped after repeated failures", self.name));
                        }
                        break;
                    }
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(name = %self.name, "agent worker stopped");
    }

    async fn turn(&mut self, trigger: Trigger) -> TurnOutcome {
        if trigger.text.trim().is_empty() {
            return TurnOutcome::Continue;
        }
        let Some(session) = self.session.upgrade() else {
            return TurnOutcome::Stop;
        };
        let marker = self.me.marker.clone();
        let ticket = trigger.ticket;

        if !session.claim_trigger(self.role(), ticket, &trigger.text) {
            debug!(ticket, "skipping stale trigger");
            return TurnOutcome::Continue;
        }

        self.set_state(WorkerState::Generating);
        let generated = tokio::select! {
            biased;
            _ = self.me.cancel.cancelled() => return TurnOutcome::Stop,
            _ = marker.cancelled(ticket) => {
                debug!(ticket, "generation cancelled");
                return TurnOutcome::Continue;
            }
            result = tokio::time::timeout(
                self.settings.provider_timeout,
                self.model.generate(&trigger.text),
            ) => result,
        };

        let response = match generated {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                warn!("model returned an empty response; skipping turn");
                marker.finish(ticket);
                return TurnOutcome::Continue;
            }
            Ok(Err(e)) => {
                error!(error = %e, "generation failed");
                marker.finish(ticket);
                session.notify(format!("{} failed to respond: {}", self.name, e));
                return TurnOutcome::Continue;
            }
            Err(_) => {
                let e = ProviderError::Timeout(self.settings.provider_timeout.as_secs_f64());
                error!(error = %e, "generation timed out");
                marker.finish(ticket);
                session.notify(format!("{} failed to respond: {}", self.name, e));
                return TurnOutcome::Continue;
            }
        };

        if !marker.mark(ticket, &response) {
            debug!(ticket, "discarding response to a cancelled trigger");
            return TurnOutcome::Continue;
        }

        match self.reveal(&session, &response, ticket).await {
            Reveal::Done => {
                marker.finish(ticket);
                self.model.record_reply(&response);
            }
            Reveal::Interrupted(shown) => {
                self.abandon(&session, shown);
                return TurnOutcome::Continue;
            }
            Reveal::Stopped => return TurnOutcome::Stop,
        }

        self.set_state(WorkerState::Synthesizing);
        let audio = tokio::select! {
            biased;
            _ = self.me.cancel.cancelled() => return TurnOutcome::Stop,
            result = tokio::time::timeout(
                self.settings.provider_timeout,
                self.tts.synthesize(&response),
            ) => match result {
                Ok(Ok(audio)) => Some(audio),
                Ok(Err(e)) => {
                    warn!(error = %e, "synthesis failed; delivering text only");
                    None
                }
                Err(_) => {
                    let e = SynthesisError::Timeout(self.settings.provider_timeout.as_secs_f64());
                    warn!(error = %e, "synthesis failed; delivering text only");
                    None
                }
            },
        };

        let has_audio = audio.is_some();
        let message = Message::finalized(&self.name, self.role(), &response).with_audio(audio);

        // Armed before publishing so an immediate acknowledgement is not lost.
        self.me.gate.arm();
        session.publish(SessionEvent::AgentResponse {
            session: session.code().to_string(),
            message: message.clone(),
        });
        if !session.append_message(message) || session.is_closed() {
            return TurnOutcome::Stop;
        }

        if has_audio {
            self.set_state(WorkerState::AwaitingPlayback);
            tokio::select! {
                biased;
                _ = self.me.cancel.cancelled() => return TurnOutcome::Stop,
                waited = tokio::time::timeout(self.settings.playback_timeout, self.me.gate.wait()) => {
                    if waited.is_err() {
                        warn!("no playback acknowledgement; continuing");
                    }
                }
            }
        }

        if self.sibling.enqueue_input(&response).is_none() {
            warn!(sibling = %self.sibling.role, "sibling inbox closed");
            return TurnOutcome::Stop;
        }
        debug!(sibling = %self.sibling.role, chars = response.chars().count(), "response handed over");
        TurnOutcome::Continue
    }

    /// Publish `text` one character at a time, pausing between characters.
    async fn reveal(&mut self, session: &Session, text: &str, ticket: u64) -> Reveal {
        self.set_state(WorkerState::Revealing);
        let marker = &self.me.marker;
        let total = text.chars().count();
        let mut shown = "";

        for (i, prefix) in reveal_prefixes(text).enumerate() {
            if !marker.is_live(ticket) {
                return Reveal::Interrupted(shown.to_string());
            }
            shown = prefix;

            let last = i + 1 == total;
            let message = if last {
                Message::finalized(&self.name, self.role(), prefix)
            } else {
                Message::typing(&self.name, self.role(), prefix)
            };
            session.publish(SessionEvent::AgentMessage {
                session: session.code().to_string(),
                message,
            });

            if last {
                break;
            }

            let delay = self.pacer.next_delay();
            tokio::select! {
                biased;
                _ = self.me.cancel.cancelled() => return Reveal::Stopped,
                _ = marker.cancelled(ticket) => return Reveal::Interrupted(shown.to_string()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Reveal::Done
    }

    /// Wind down a reveal that was interrupted after showing `shown`.
    fn abandon(&mut self, session: &Session, shown: String) {
        let shown_chars = shown.chars().count();
        info!(shown_chars, "response interrupted");

        if !shown.is_empty() {
            self.model.record_partial(&shown);
        }

        if shown_chars > self.settings.keep_partial_chars {
            session.publish(SessionEvent::AgentMessage {
                session: session.code().to_string(),
                message: Message::finalized(&self.name, self.role(), format!("{}...", shown)),
            });
        } else {
            session.publish(SessionEvent::ClearResponse {
                session: session.code().to_string(),
                role: self.role(),
            });
        }
    }
}
