//! Streaming session bookkeeping.
//!
//! A HomeKit stream session is identified by the viewer-chosen session id and
//! moves through:
//!
//! ```text
//! negotiate  -> Pending   (ports, SSRCs, SRTP material, optional relay)
//! start      -> Starting  (pending record consumed, transcoder launching)
//!            -> Active    (owns transcoder processes and the relay)
//! stop       -> (removed) from any state; unknown ids are a no-op
//! ```
//!
//! Pending sessions that are never started are dropped once they outlive the
//! configured pending timeout (checked on every negotiation).
//!
//! There is no error state: a failed start releases what it acquired and the
//! id simply disappears from the registry.

pub mod transport;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::media::rtp::SsrcGenerator;
use crate::process::ProcessHandle;
use crate::transport::{AddressFamily, TwoWayAudioRelay};
pub use transport::{CryptoSuite, MediaTransport, SrtpParams};

/// Where a session id currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Starting,
    Active,
}

/// A negotiated session waiting for its start request.
#[derive(Debug)]
pub struct PendingSession {
    pub id: String,
    pub peer: IpAddr,
    pub family: AddressFamily,
    pub video: MediaTransport,
    pub audio: MediaTransport,
    /// Talkback decoder port, present only when two-way audio was negotiated.
    pub two_way_port: Option<u16>,
    pub has_aac: bool,
    pub relay: Option<TwoWayAudioRelay>,
    /// When the negotiation was stored.
    pub negotiated_at: Instant,
}

impl PendingSession {
    /// Release a negotiation that will never be started.
    pub async fn abandon(self) {
        if let Some(relay) = &self.relay {
            relay.close().await;
        }
        tracing::debug!(session_id = %self.id, "pending session abandoned");
    }
}

/// A streaming session with running transcoders.
pub struct ActiveSession {
    pub id: String,
    /// Outbound transcoder first, talkback decoder second.
    pub processes: Vec<Box<dyn ProcessHandle>>,
    pub relay: Option<TwoWayAudioRelay>,
    video_ssrc: u32,
    audio_ssrc: u32,
}

impl ActiveSession {
    pub fn new(
        id: &str,
        ssrcs: (u32, u32),
        processes: Vec<Box<dyn ProcessHandle>>,
        relay: Option<TwoWayAudioRelay>,
    ) -> Self {
        Self {
            id: id.to_string(),
            processes,
            relay,
            video_ssrc: ssrcs.0,
            audio_ssrc: ssrcs.1,
        }
    }

    /// Terminate every process in order, then close the relay.
    ///
    /// Failures are logged and do not stop the rest of the teardown.
    pub async fn teardown(mut self) {
        for (index, process) in self.processes.iter_mut().enumerate() {
            let pid = process.id();
            if let Err(e) = process.stop().await {
                tracing::warn!(session_id = %self.id, index, ?pid, error = %e, "failed to stop transcoder");
            }
        }
        if let Some(relay) = &self.relay {
            relay.close().await;
        }
        tracing::debug!(session_id = %self.id, "active session torn down");
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("processes", &self.processes.len())
            .field("relay", &self.relay.is_some())
            .finish()
    }
}

/// Identifies one start attempt.
///
/// A stopped and renegotiated id can have a newer start in flight; only the
/// attempt holding the matching ticket may publish or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StartTicket(u64);

struct Starting {
    ticket: StartTicket,
    ssrcs: (u32, u32),
}

/// Everything the registry held for one id, handed back on removal.
#[derive(Debug, Default)]
pub struct Removed {
    pub pending: Option<PendingSession>,
    pub active: Option<ActiveSession>,
    pub was_starting: bool,
}

impl Removed {
    pub fn is_empty(&self) -> bool {
        self.pending.is_none() && self.active.is_none() && !self.was_starting
    }
}

#[derive(Default)]
struct Sessions {
    pending: HashMap<String, PendingSession>,
    starting: HashMap<String, Starting>,
    active: HashMap<String, ActiveSession>,
}

impl Sessions {
    fn ssrc_in_use(&self, ssrc: u32) -> bool {
        self.pending
            .values()
            .any(|s| s.video.ssrc == ssrc || s.audio.ssrc == ssrc)
            || self
                .starting
                .values()
                .any(|s| s.ssrcs.0 == ssrc || s.ssrcs.1 == ssrc)
            || self
                .active
                .values()
                .any(|s| s.video_ssrc == ssrc || s.audio_ssrc == ssrc)
    }
}

/// Registry of pending and active streaming sessions.
///
/// Every method is a single critical section; the lock is never held across
/// an `.await`, so each state transition is atomic with respect to any other
/// operation on the same id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<Sessions>>,
    tickets: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign SSRCs and store a pending session, replacing any stale entry.
    ///
    /// The video and audio SSRCs differ from each other and from every SSRC
    /// held by another session in the registry. Returns the assigned
    /// `(video, audio)` pair and the replaced entry, if any.
    pub fn insert_pending(
        &self,
        mut session: PendingSession,
        generator: &dyn SsrcGenerator,
    ) -> ((u32, u32), Option<PendingSession>) {
        let mut sessions = self.sessions.lock();

        // The stale entry's SSRCs are about to be freed.
        let stale = sessions.pending.remove(&session.id);

        let video = loop {
            let ssrc = generator.generate();
            if !sessions.ssrc_in_use(ssrc) {
                break ssrc;
            }
        };
        let audio = loop {
            let ssrc = generator.generate();
            if ssrc != video && !sessions.ssrc_in_use(ssrc) {
                break ssrc;
            }
        };

        session.video.ssrc = video;
        session.audio.ssrc = audio;

        let id = session.id.clone();
        sessions.pending.insert(id.clone(), session);
        tracing::debug!(
            session_id = %id,
            video_ssrc = video,
            audio_ssrc = audio,
            replaced = stale.is_some(),
            pending = sessions.pending.len(),
            "pending session stored"
        );

        ((video, audio), stale)
    }

    /// Consume the pending record for `id` and mark the session as starting.
    pub fn begin_start(&self, id: &str) -> Option<(StartTicket, PendingSession)> {
        let mut sessions = self.sessions.lock();
        let pending = sessions.pending.remove(id)?;
        let ticket = StartTicket(self.tickets.fetch_add(1, Ordering::Relaxed));
        sessions.starting.insert(
            id.to_string(),
            Starting {
                ticket,
                ssrcs: (pending.video.ssrc, pending.audio.ssrc),
            },
        );
        tracing::debug!(session_id = id, ticket = ticket.0, "pending -> starting");
        Some((ticket, pending))
    }

    /// Remove the starting marker for `id` if it still belongs to `ticket`.
    fn take_starting(sessions: &mut Sessions, id: &str, ticket: StartTicket) -> bool {
        match sessions.starting.get(id) {
            Some(starting) if starting.ticket == ticket => {
                sessions.starting.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Forget a start that failed before producing an active session.
    pub fn abort_start(&self, id: &str, ticket: StartTicket) {
        if Self::take_starting(&mut self.sessions.lock(), id, ticket) {
            tracing::debug!(session_id = id, ticket = ticket.0, "start aborted");
        }
    }

    /// Publish a started session.
    ///
    /// Hands the session back when its start was stopped (or superseded by a
    /// newer start of the same id); the caller then owns its teardown.
    pub fn activate(
        &self,
        ticket: StartTicket,
        session: ActiveSession,
    ) -> Result<(), ActiveSession> {
        let mut sessions = self.sessions.lock();
        if !Self::take_starting(&mut sessions, &session.id, ticket) {
            return Err(session);
        }
        tracing::debug!(
            session_id = %session.id,
            active = sessions.active.len() + 1,
            "starting -> active"
        );
        sessions.active.insert(session.id.clone(), session);
        Ok(())
    }

    /// Remove every trace of `id`.
    pub fn remove(&self, id: &str) -> Removed {
        let mut sessions = self.sessions.lock();
        let removed = Removed {
            pending: sessions.pending.remove(id),
            active: sessions.active.remove(id),
            was_starting: sessions.starting.remove(id).is_some(),
        };
        if !removed.is_empty() {
            tracing::debug!(
                session_id = id,
                pending = sessions.pending.len(),
                active = sessions.active.len(),
                "session removed"
            );
        }
        removed
    }

    /// Remove pending sessions negotiated more than `max_age` ago.
    pub fn take_expired(&self, max_age: Duration) -> Vec<PendingSession> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .pending
            .iter()
            .filter(|(_, s)| s.negotiated_at.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.pending.remove(id))
            .collect()
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        let sessions = self.sessions.lock();
        if sessions.active.contains_key(id) {
            Some(SessionState::Active)
        } else if sessions.starting.contains_key(id) {
            Some(SessionState::Starting)
        } else if sessions.pending.contains_key(id) {
            Some(SessionState::Pending)
        } else {
            None
        }
    }

    /// Every id known to the registry, in any state.
    pub fn ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock();
        let mut ids: HashSet<String> = sessions.active.keys().cloned().collect();
        ids.extend(sessions.starting.keys().cloned());
        ids.extend(sessions.pending.keys().cloned());
        ids.into_iter().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.sessions.lock().pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        let sessions = self.sessions.lock();
        sessions.pending.is_empty() && sessions.starting.is_empty() && sessions.active.is_empty()
    }
}
