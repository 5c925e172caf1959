use crate::departure::Language;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Generating,
    Playing,
}

/// Observable state of one active announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub departure_id: String,
    pub phase: Phase,
    /// 1-based; 0 while generating.
    pub repeat: u8,
    pub total_repeats: u8,
    pub language: Option<Language>,
}

struct Session {
    id: u64,
    progress: Progress,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    sessions: HashMap<String, Session>,
}

/// Per-departure active guards. Check-and-set happens under one lock.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<Registry>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `departure_id` active, or returns `None` if it already is.
    pub fn try_begin(&self, departure_id: &str, total_repeats: u8) -> Option<SessionGuard> {
        let mut registry = self.lock();
        if registry.sessions.contains_key(departure_id) {
            return None;
        }
        registry.next_id += 1;
        let id = registry.next_id;
        let (cancel, cancelled) = watch::channel(false);
        registry.sessions.insert(
            departure_id.to_string(),
            Session {
                id,
                progress: Progress {
                    departure_id: departure_id.to_string(),
                    phase: Phase::Generating,
                    repeat: 0,
                    total_repeats,
                    language: None,
                },
                cancel,
            },
        );
        Some(SessionGuard {
            table: self.clone(),
            departure_id: departure_id.to_string(),
            id,
            cancelled,
        })
    }

    /// Ends the session right away; its task notices through the guard.
    /// Returns the progress it had reached.
    pub fn cancel(&self, departure_id: &str) -> Option<Progress> {
        let session = self.lock().sessions.remove(departure_id)?;
        let _ = session.cancel.send(true);
        Some(session.progress)
    }

    pub fn cancel_all(&self) -> usize {
        let sessions: Vec<Session> = self.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            let _ = session.cancel.send(true);
        }
        sessions.len()
    }

    pub fn progress(&self, departure_id: &str) -> Option<Progress> {
        self.lock()
            .sessions
            .get(departure_id)
            .map(|s| s.progress.clone())
    }

    pub fn active(&self) -> Vec<Progress> {
        let mut all: Vec<Progress> = self
            .lock()
            .sessions
            .values()
            .map(|s| s.progress.clone())
            .collect();
        all.sort_by(|a, b| a.departure_id.cmp(&b.departure_id));
        all
    }

    pub fn is_active(&self, departure_id: &str) -> bool {
        self.lock().sessions.contains_key(departure_id)
    }
}

/// Releases the departure's active flag when dropped, on every exit path.
pub struct SessionGuard {
    table: SessionTable,
    departure_id: String,
    id: u64,
    cancelled: watch::Receiver<bool>,
}

impl SessionGuard {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        // An Err means the sender is gone, which only happens after cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Records progress. Returns false once the session has been cancelled.
    pub fn update(&self, phase: Phase, repeat: u8, language: Option<Language>) -> bool {
        let mut registry = self.table.lock();
        match registry.sessions.get_mut(&self.departure_id) {
            Some(session) if session.id == self.id => {
                session.progress.phase = phase;
                session.progress.repeat = repeat;
                session.progress.language = language;
                true
            }
            _ => false,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut registry = self.table.lock();
        if registry
            .sessions
            .get(&self.departure_id)
            .is_some_and(|s| s.id == self.id)
        {
            registry.sessions.remove(&self.departure_id);
        }
    }
}
