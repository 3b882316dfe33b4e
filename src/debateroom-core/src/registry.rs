//! Session registry: code allocation, lookup, teardown and event routing.

use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::DebateError;
use crate::events::{InboundEvent, SharedEventBus};
use crate::factory::AgentFactory;
use crate::session::Session;
use crate::similarity::{EditRatio, SimilarityScorer};

type SessionMap = Arc<Mutex<HashMap<String, Arc<Session>>>>;

pub struct SessionRegistry {
    sessions: SessionMap,
    config: Arc<Config>,
    bus: SharedEventBus,
    scorer: Arc<dyn SimilarityScorer>,
    factory: Arc<dyn AgentFactory>,
    alphabet: Vec<char>,
}

impl SessionRegistry {
    pub fn new(
        config: Config,
        bus: SharedEventBus,
        factory: Arc<dyn AgentFactory>,
    ) -> Result<Self, DebateError> {
        config.validate()?;

        let mut alphabet: Vec<char> = Vec::new();
        for c in config.registry.code_alphabet.chars() {
            if !alphabet.contains(&c) {
                alphabet.push(c);
            }
        }

        Ok(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            bus,
            scorer: Arc::new(EditRatio),
            factory,
            alphabet,
        })
    }

    /// Replace the similarity measure used by every session created afterwards.
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        lock_map(&self.sessions)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Number of distinct codes, saturating.
    fn code_space(&self) -> usize {
        let length = u32::try_from(self.config.registry.code_length).unwrap_or(u32::MAX);
        self.alphabet.len().saturating_pow(length)
    }

    fn random_code(&self) -> String {
        let mut rng = rand::rng();
        (0..self.config.registry.code_length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect()
    }

    /// Allocate a fresh code, start a session under it and return the code.
    pub fn create_session(&self) -> Result<String, DebateError> {
        let mut sessions = self.lock();

        let capacity = self.code_space();
        if sessions.len() >= capacity {
            return Err(DebateError::CodeSpaceExhausted {
                capacity,
                length: self.config.registry.code_length,
            });
        }

        let code = loop {
            let candidate = self.random_code();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::start(
            code.clone(),
            self.config.clone(),
            self.bus.clone(),
            self.scorer.clone(),
            self.factory.as_ref(),
        )?;
        sessions.insert(code.clone(), session.clone());
        info!(session = %code, active = sessions.len(), "session created");
        drop(sessions);

        evict_on_close(self.sessions.clone(), code.clone(), &session);
        Ok(code)
    }

    pub fn get_session(&self, code: &str) -> Option<Arc<Session>> {
        self.lock().get(code).cloned()
    }

    /// Evict a session and stop its workers. Returns whether it existed.
    pub async fn remove_session(&self, code: &str) -> bool {
        let Some(session) = self.lock().remove(code) else {
            return false;
        };
        session.stop().await;
        info!(session = %code, "session removed");
        true
    }

    pub fn list_sessions(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    /// `name` connected to `code`. Returns whether the session exists.
    pub fn join(&self, code: &str, name: &str) -> bool {
        match self.get_session(code) {
            Some(session) => {
                session.add_member();
                session.notify(format!("{} has entered the room", name));
                true
            }
            None => false,
        }
    }

    /// `name` left `code`; the session is removed with its last member.
    /// Returns whether the session is still open.
    pub async fn leave(&self, code: &str, name: &str) -> bool {
        let Some(session) = self.get_session(code) else {
            return false;
        };
        session.notify(format!("{} has left the room", name));
        if session.remove_member() {
            return true;
        }
        self.remove_session(code).await;
        false
    }

    /// Route an inbound event. Unknown codes are dropped silently.
    pub fn dispatch(&self, code: &str, event: InboundEvent) -> bool {
        match self.get_session(code) {
            Some(session) => {
                session.handle(event);
                true
            }
            None => {
                debug!(session = %code, "dropping event for unknown session");
                false
            }
        }
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.stop().await;
        }
    }
}

fn lock_map(sessions: &SessionMap) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop `code` from the registry once its session closes, unless the code
/// has been taken over by a newer session in the meantime.
fn evict_on_close(sessions: SessionMap, code: String, session: &Arc<Session>) {
    let mut closed = session.watch_closed();
    let session = Arc::downgrade(session);

    tokio::spawn(async move {
        if closed.wait_for(|closed| *closed).await.is_err() {
            return;
        }
        let evicted = {
            let mut sessions = lock_map(&sessions);
            let ours = sessions
                .get(&code)
                .is_some_and(|current| Arc::as_ptr(current) == session.as_ptr());
            if ours { sessions.remove(&code) } else { None }
        };
        if let Some(session) = evicted {
            session.stop().await;
            info!(session = %code, "closed session evicted");
        }
    });
}
