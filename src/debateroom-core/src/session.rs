//! A debate room: two agent workers wired into a loop, the message log and
//! the turn limit.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::coalesce::{CoalescePolicy, Decision, InputKind};
use crate::config::Config;
use crate::error::DebateError;
use crate::events::{InboundEvent, SessionEvent, SharedEventBus};
use crate::factory::AgentFactory;
use crate::message::{Message, MessageLog};
use crate::pacing::TypingPacer;
use crate::participant::Role;
use crate::similarity::SimilarityScorer;
use crate::worker::{AgentHandle, AgentWorker, WorkerSettings, WorkerState};

struct SessionState {
    log: MessageLog,
    turns: u32,
    members: usize,
    closed: bool,
    /// Last text that started a generation, per side.
    triggers: [Option<String>; 2],
    topic: Option<String>,
}

pub struct Session {
    code: String,
    config: Arc<Config>,
    bus: SharedEventBus,
    scorer: Arc<dyn SimilarityScorer>,
    state: Mutex<SessionState>,
    agents: [AgentHandle; 2],
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
}

impl Session {
    /// Build both sides' providers, wire the workers into a loop and spawn them.
    pub fn start(
        code: impl Into<String>,
        config: Arc<Config>,
        bus: SharedEventBus,
        scorer: Arc<dyn SimilarityScorer>,
        factory: &dyn AgentFactory,
    ) -> Result<Arc<Session>, DebateError> {
        let code = code.into();
        let pacer = TypingPacer::new(&config.pacing)?;
        let pros_providers = factory.build(Role::Pros, &config)?;
        let cons_providers = factory.build(Role::Cons, &config)?;

        let (pros, pros_inbox) = AgentHandle::new(Role::Pros);
        let (cons, cons_inbox) = AgentHandle::new(Role::Cons);

        let session = Arc::new(Session {
            code: code.clone(),
            state: Mutex::new(SessionState {
                log: MessageLog::new(config.debate.log_capacity),
                turns: 0,
                members: 0,
                closed: false,
                triggers: [None, None],
                topic: None,
            }),
            agents: [pros.clone(), cons.clone()],
            tasks: Mutex::new(Vec::with_capacity(2)),
            closed: watch::channel(false).0,
            config,
            bus,
            scorer,
        });

        let settings = WorkerSettings {
            provider_timeout: session.config.timeouts.provider(),
            playback_timeout: session.config.timeouts.playback(),
            keep_partial_chars: session.config.debate.keep_partial_chars,
            max_restarts: session.config.supervision.max_restarts,
        };

        let workers = [
            (pros.clone(), cons.clone(), pros_inbox, pros_providers),
            (cons, pros, cons_inbox, cons_providers),
        ];

        let mut tasks = session.lock_tasks();
        for (me, sibling, inbox, providers) in workers {
            let role = me.role();
            let worker = AgentWorker::new(
                session.config.agent(role).name.clone(),
                providers.model,
                providers.tts,
                inbox,
                me,
                sibling,
                Arc::downgrade(&session),
                pacer.clone(),
                settings.clone(),
            );
            let span = info_span!("agent", session = %code, %role);
            tasks.push(tokio::spawn(worker.run().instrument(span)));
        }
        drop(tasks);

        info!(session = %code, "session started");
        Ok(session)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn agent(&self, role: Role) -> &AgentHandle {
        &self.agents[role.index()]
    }

    pub fn worker_state(&self, role: Role) -> WorkerState {
        self.agent(role).state()
    }

    pub(crate) fn publish(&self, event: SessionEvent) -> usize {
        self.bus.publish(event)
    }

    pub(crate) fn notify(&self, text: impl Into<String>) {
        self.publish(SessionEvent::Notification {
            session: self.code.clone(),
            text: text.into(),
        });
    }

    /// Append a finalized message and count the turn. Returns `false` once the
    /// debate is over. The append that reaches the turn limit is accepted and
    /// closes the session.
    pub fn append_message(&self, message: Message) -> bool {
        let reached_limit = {
            let mut state = self.lock_state();
            if state.closed {
                return false;
            }
            state.log.push(message);
            state.turns += 1;
            debug!(session = %self.code, turns = state.turns, "message appended");
            state.turns >= self.config.debate.max_turns
        };

        if reached_limit {
            info!(session = %self.code, max_turns = self.config.debate.max_turns, "turn limit reached");
            self.close(format!(
                "Debate finished after {} turns",
                self.config.debate.max_turns
            ));
        }
        true
    }

    /// First message not yet handed to playback, marked as played.
    pub fn next_unplayed_message(&self) -> Option<Message> {
        self.lock_state().log.take_unplayed()
    }

    pub async fn wait_for_playback(&self, role: Role) {
        self.agent(role).playback().wait().await
    }

    pub fn signal_playback_done(&self, role: Role) {
        self.agent(role).playback().signal()
    }

    pub fn is_playback_done(&self, role: Role) -> bool {
        self.agent(role).playback().is_done()
    }

    pub fn add_member(&self) {
        self.lock_state().members += 1;
    }

    /// Returns whether anyone is still in the room.
    pub fn remove_member(&self) -> bool {
        let mut state = self.lock_state();
        state.members = state.members.saturating_sub(1);
        state.members > 0
    }

    pub fn member_count(&self) -> usize {
        self.lock_state().members
    }

    pub fn turn_count(&self) -> u32 {
        self.lock_state().turns
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().log.iter().cloned().collect()
    }

    /// Last text that started a generation for `role`.
    pub fn last_trigger(&self, role: Role) -> Option<String> {
        self.lock_state().triggers[role.index()].clone()
    }

    /// Topic the debate was opened with, if any.
    pub fn topic(&self) -> Option<String> {
        self.lock_state().topic.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Resolves once the session has closed.
    pub async fn closed(&self) {
        let _ = self.watch_closed().wait_for(|closed| *closed).await;
    }

    /// Errors on `wait_for` mean the session was dropped without closing.
    pub(crate) fn watch_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Apply an event from the transport. Events for a closed session are
    /// dropped.
    pub fn handle(&self, event: InboundEvent) {
        if self.is_closed() {
            debug!(session = %self.code, ?event, "dropping event for closed session");
            return;
        }

        match event {
            InboundEvent::UserMessage { role, text } => {
                if text.trim().is_empty() {
                    return;
                }
                self.echo(role, &text, false);
                self.user_input(role, InputKind::Send, &text);
            }
            InboundEvent::Typing { role, text } => {
                self.echo(role, &text, true);
                self.user_input(role, InputKind::Typing, &text);
            }
            InboundEvent::PlaybackFinished { role } => self.signal_playback_done(role),
            InboundEvent::SendTopic { topic } => {
                if topic.trim().is_empty() {
                    return;
                }
                let role = self.config.debate.opening_role;
                let text = self.config.topic_announcement(&topic);
                self.lock_state().topic = Some(topic.trim().to_string());
                self.echo(role, &text, false);
                self.user_input(role, InputKind::Send, &text);
            }
        }
    }

    fn echo(&self, role: Role, text: &str, is_typing: bool) {
        self.publish(SessionEvent::UserMessage {
            session: self.code.clone(),
            role,
            text: text.to_string(),
            is_typing,
        });
    }

    /// Run the coalescing policy for user input aimed at `role`. The session
    /// lock is held from reading the marker to recording the new trigger.
    pub fn user_input(&self, role: Role, kind: InputKind, text: &str) -> Decision {
        let mut state = self.lock_state();
        if state.closed {
            return Decision::Ignore;
        }

        let agent = self.agent(role);
        let policy = CoalescePolicy {
            scorer: self.scorer.as_ref(),
            threshold: self.config.debate.similarity_threshold,
        };
        let decision = policy.decide(
            kind,
            agent.marker().is_active(),
            state.triggers[role.index()].as_deref(),
            text,
        );

        if let Decision::Issue { interrupt } = decision {
            if interrupt {
                let stale = agent.marker().cancel();
                debug!(session = %self.code, %role, ?stale, "cancelled stale generation");
            }
            if agent.issue(text).is_some() {
                state.triggers[role.index()] = Some(text.to_string());
            } else {
                warn!(session = %self.code, %role, "worker inbox closed");
            }
        }

        debug!(session = %self.code, %role, ?kind, ?decision, "user input");
        decision
    }

    /// Claim `role`'s marker for a dequeued trigger and record it as the text
    /// the side is now answering. Fails for a ticket cancelled while queued.
    pub(crate) fn claim_trigger(&self, role: Role, ticket: u64, text: &str) -> bool {
        let mut state = self.lock_state();
        if !self.agent(role).marker().mark(ticket, text) {
            return false;
        }
        state.triggers[role.index()] = Some(text.to_string());
        true
    }

    /// Close the session and tell both workers to stop without waiting.
    pub fn request_stop(&self) {
        self.close("Debate closed");
    }

    fn close(&self, reason: impl Into<String>) {
        {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        for agent in &self.agents {
            agent.stop();
        }
        self.closed.send_replace(true);
        self.notify(reason);
    }

    /// Stop both workers, waiting up to the configured join timeout for each
    /// before aborting it. An aborted worker stuck inside a provider call
    /// releases that call's resources only when the call itself returns.
    pub async fn stop(&self) {
        self.request_stop();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_tasks());
        let deadline = self.config.timeouts.join();

        for mut handle in handles {
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                warn!(session = %self.code, "worker did not stop in time; aborting");
                handle.abort();
            }
        }
        info!(session = %self.code, "session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for agent in &self.agents {
            agent.stop();
        }
    }
}
