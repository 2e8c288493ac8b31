//! Session registry keyed by join code
//!
//! The registry owns every live [`Session`] and maps the short
//! human-shareable [`SessionCode`] to it. Players resolve a code to a
//! session here; unknown codes are rejected rather than auto-created, only
//! a host hosting a quiz brings a session into existence.
//!
//! Hosting follows a single-lease policy: one host identity per session.
//! The same host ID may reconnect and pick its session back up, but a
//! different ID presenting itself as host for a live code is turned away.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use super::{
    coordinator::{JoinError, Session},
    quiz::Quiz,
    roster::Id,
    session::Tunnel,
    session_code::SessionCode,
};

/// Errors produced when resolving a session code
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No live session exists for the given code
    #[error("no session with this code")]
    SessionNotFound,
    /// Another host already holds the lease for this session
    #[error("session already has a host")]
    HostLeaseHeld,
}

/// A registered session together with its lease bookkeeping
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    /// The session itself
    session: Session,
    /// The host identity holding the lease
    host_id: Id,
    /// Last time the session was touched through the registry
    last_activity: SystemTime,
}

/// All live sessions, keyed by their join codes
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Registry {
    sessions: HashMap<SessionCode, Entry>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Checks whether the registry holds no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Creates a session for a quiz and registers it under a fresh code
    ///
    /// # Returns
    ///
    /// The code players use to join.
    ///
    /// # Errors
    ///
    /// Returns the quiz's consistency-check error if the configuration is
    /// invalid.
    pub fn host_session(
        &mut self,
        quiz: Quiz,
        host_id: Id,
    ) -> Result<SessionCode, super::quiz::Error> {
        let session = Session::new(quiz, host_id)?;

        let code = loop {
            let candidate = SessionCode::new();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        log::debug!("session {code} hosted by {host_id}");

        self.sessions.insert(
            code,
            Entry {
                session,
                host_id,
                last_activity: SystemTime::now(),
            },
        );

        Ok(code)
    }

    /// Resolves a code to its session, refreshing the activity timestamp
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for unknown codes.
    pub fn session_mut(&mut self, code: &SessionCode) -> Result<&mut Session, Error> {
        let entry = self
            .sessions
            .get_mut(code)
            .ok_or(Error::SessionNotFound)?;
        entry.last_activity = SystemTime::now();
        Ok(&mut entry.session)
    }

    /// Resolves a code without mutating anything
    pub fn session(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code).map(|entry| &entry.session)
    }

    /// Resolves a code on behalf of a connecting host
    ///
    /// The lease holder may reconnect and reclaim its session; any other
    /// identity is rejected, so two hosts can never drive the same session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for unknown codes and
    /// [`Error::HostLeaseHeld`] when `host_id` is not the lease holder.
    pub fn claim_host(
        &mut self,
        code: &SessionCode,
        host_id: Id,
    ) -> Result<&mut Session, Error> {
        let entry = self
            .sessions
            .get_mut(code)
            .ok_or(Error::SessionNotFound)?;

        if entry.host_id != host_id {
            log::warn!("rejected host claim on {code} by {host_id}");
            return Err(Error::HostLeaseHeld);
        }

        entry.last_activity = SystemTime::now();
        Ok(&mut entry.session)
    }

    /// Adds a player to the session behind a code
    ///
    /// Rejoining with a known `Id` is idempotent, exactly as
    /// [`Session::add_player`] is.
    ///
    /// # Returns
    ///
    /// The assigned username.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] wrapped in [`JoinRejected`] for
    /// unknown codes, or the session's own join rejection.
    pub fn join<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        code: &SessionCode,
        id: Id,
        requested_username: &str,
        tunnel_finder: F,
    ) -> Result<String, JoinRejected> {
        let session = self.session_mut(code)?;
        Ok(session.add_player(id, requested_username, tunnel_finder)?)
    }

    /// Closes the session behind a code and drops it from the registry
    ///
    /// Unknown codes are a no-op, so closing is idempotent.
    pub fn remove<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        code: &SessionCode,
        tunnel_finder: F,
    ) {
        if let Some(mut entry) = self.sessions.remove(code) {
            entry.session.close(tunnel_finder);
        }
    }

    /// Drops sessions that ended or have been inactive for too long
    ///
    /// # Returns
    ///
    /// The number of sessions removed.
    pub fn sweep<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) -> usize {
        let timeout =
            web_time::Duration::from_secs(crate::constants::session::INACTIVITY_TIMEOUT);

        let expired: Vec<SessionCode> = self
            .sessions
            .iter()
            .filter(|(_, entry)| {
                entry.session.is_ended()
                    || entry
                        .last_activity
                        .elapsed()
                        .is_ok_and(|idle| idle > timeout)
            })
            .map(|(code, _)| *code)
            .collect();

        for code in &expired {
            log::debug!("sweeping session {code}");
            self.remove(code, &tunnel_finder);
        }

        expired.len()
    }
}

/// Why a join-by-code request was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinRejected {
    /// The code does not resolve to a live session
    #[error(transparent)]
    Registry(#[from] Error),
    /// The session refused the player
    #[error(transparent)]
    Session(#[from] JoinError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::coordinator::tests::MockTunnel;
    use crate::quiz::tests::create_test_quiz;

    fn no_tunnels(_id: Id) -> Option<MockTunnel> {
        None
    }

    #[test]
    fn test_host_session_registers_unique_code() {
        let mut registry = Registry::new();
        let code_a = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();
        let code_b = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();

        assert_ne!(code_a, code_b);
        assert_eq!(registry.len(), 2);
        assert!(registry.session(&code_a).is_some());
    }

    #[test]
    fn test_host_session_rejects_invalid_quiz() {
        let mut registry = Registry::new();
        let mut quiz = create_test_quiz();
        quiz.questions.clear();

        assert!(registry.host_session(quiz, Id::new()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_join_unknown_code_rejected() {
        let mut registry = Registry::new();
        let result = registry.join(&SessionCode::new(), Id::new(), "Alice", no_tunnels);
        assert_eq!(
            result,
            Err(JoinRejected::Registry(Error::SessionNotFound))
        );
    }

    #[test]
    fn test_join_and_rejoin() {
        let mut registry = Registry::new();
        let code = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();

        let player = Id::new();
        assert_eq!(
            registry.join(&code, player, "Alice", no_tunnels),
            Ok("Alice".to_string())
        );
        // Idempotent rejoin keeps the original username
        assert_eq!(
            registry.join(&code, player, "Renamed", no_tunnels),
            Ok("Alice".to_string())
        );
    }

    #[test]
    fn test_host_lease_reclaim_and_rejection() {
        let mut registry = Registry::new();
        let host_id = Id::new();
        let code = registry.host_session(create_test_quiz(), host_id).unwrap();

        assert!(registry.claim_host(&code, host_id).is_ok());
        assert_eq!(
            registry.claim_host(&code, Id::new()).err(),
            Some(Error::HostLeaseHeld)
        );
    }

    #[test]
    fn test_claim_host_unknown_code() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.claim_host(&SessionCode::new(), Id::new()).err(),
            Some(Error::SessionNotFound)
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = Registry::new();
        let code = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();

        registry.remove(&code, no_tunnels);
        assert!(registry.is_empty());
        registry.remove(&code, no_tunnels);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_removes_ended_sessions() {
        let mut registry = Registry::new();
        let live = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();
        let ended = registry
            .host_session(create_test_quiz(), Id::new())
            .unwrap();
        registry
            .session_mut(&ended)
            .unwrap()
            .close(no_tunnels);

        assert_eq!(registry.sweep(no_tunnels), 1);
        assert!(registry.session(&live).is_some());
        assert!(registry.session(&ended).is_none());
    }
}
