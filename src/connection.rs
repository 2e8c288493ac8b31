//! Connection manager for a client's single live session link
//!
//! The manager owns exactly one logical connection at a time and keeps it
//! stable across repeated `connect` calls: connecting to the code already
//! being served is a no-op, so remounting a UI can never produce a
//! duplicate participant. Connecting to a different code replaces the old
//! connection.
//!
//! The manager is sans-io. It never opens sockets; it hands the embedder a
//! [`Directive`] saying what to do (open a transport, wait out a backoff)
//! and the embedder reports outcomes back through
//! [`ConnectionManager::on_connected`] and
//! [`ConnectionManager::on_connection_lost`]. Every open carries an epoch
//! number, and outcome reports for a superseded epoch are ignored, so two
//! racing `connect` calls cannot leave two live connections: the later
//! epoch wins.
//!
//! Lost connections are retried with bounded exponential backoff. After
//! the retry budget is exhausted the status becomes [`Status::Failed`] and
//! only an explicit [`ConnectionManager::retry_now`] starts a fresh cycle.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use web_time::Duration;

use super::{
    constants::reconnect,
    roster::{Id, Role},
    session_code::SessionCode,
};

/// Identity presented when opening a connection
///
/// Doubles as the canonical join command: the embedder serializes this and
/// sends it as the first message on a freshly opened transport, so joining
/// never depends on transport-level connect timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// The session code to join
    pub code: SessionCode,
    /// The connecting user's ID
    pub id: Id,
    /// The requested username
    pub username: String,
    /// Whether this connection drives the session as host
    pub role: Role,
}

/// Observable status of the managed connection
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No connection requested
    #[display("idle")]
    Idle,
    /// First attempt for the current credentials is in flight
    #[display("connecting")]
    Connecting,
    /// The connection is live
    #[display("connected")]
    Connected,
    /// The connection dropped; an automatic retry is pending
    #[display("reconnecting (attempt {attempt})")]
    Reconnecting {
        /// Which retry is pending (1-based)
        attempt: u32,
    },
    /// The retry budget ran out; waiting for a manual retry
    #[display("failed: {reason}")]
    Failed {
        /// Human-readable reason from the last transport failure
        reason: String,
    },
}

/// What the embedder should do after a call into the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Open a transport and send the credentials as the join command
    Open {
        /// Identifies this attempt in later outcome reports
        epoch: u64,
        /// The identity to authenticate and join with
        credentials: Credentials,
    },
    /// The live connection already serves this code; keep using it
    Reuse,
    /// Wait out the backoff, then open with the given epoch
    RetryAfter {
        /// Identifies this attempt in later outcome reports
        epoch: u64,
        /// How long to wait before opening
        delay: Duration,
        /// The identity to authenticate and join with
        credentials: Credentials,
    },
}

/// Owns the lifecycle of the process's single session connection
#[derive(Debug, Default)]
pub struct ConnectionManager {
    status: Status,
    credentials: Option<Credentials>,
    /// Bumped whenever the previous connection stops being the live one
    epoch: u64,
    /// Automatic retries consumed since the last successful connect
    attempts: u32,
}

impl Default for Status {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectionManager {
    /// Creates a manager with no connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Current observable status
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// The code the manager is serving, if any
    pub fn code(&self) -> Option<SessionCode> {
        self.credentials.as_ref().map(|c| c.code)
    }

    /// Whether the connection is currently live
    pub fn is_connected(&self) -> bool {
        matches!(self.status, Status::Connected)
    }

    /// Requests a connection for the given credentials
    ///
    /// Idempotent for the code already being served: while a connection to
    /// the same code is live or in flight, this returns
    /// [`Directive::Reuse`] and changes nothing. Any other code replaces
    /// the current connection; the embedder drops the old transport, and
    /// its late outcome reports fall on a stale epoch.
    pub fn connect(&mut self, credentials: Credentials) -> Directive {
        let same_code = self
            .credentials
            .as_ref()
            .is_some_and(|current| current.code == credentials.code);
        let in_service = matches!(
            self.status,
            Status::Connected | Status::Connecting | Status::Reconnecting { .. }
        );
        if same_code && in_service {
            return Directive::Reuse;
        }

        if same_code {
            log::debug!("reconnecting to {}", credentials.code);
        } else if let Some(previous) = &self.credentials {
            log::debug!("replacing connection to {} with {}", previous.code, credentials.code);
        }

        self.epoch += 1;
        self.attempts = 0;
        self.status = Status::Connecting;
        self.credentials = Some(credentials.clone());

        Directive::Open {
            epoch: self.epoch,
            credentials,
        }
    }

    /// Tears down the connection
    ///
    /// Safe to call at any time; disconnecting while already idle is a
    /// no-op. Pending outcome reports from the torn-down transport land on
    /// a stale epoch and are ignored.
    pub fn disconnect(&mut self) {
        if matches!(self.status, Status::Idle) {
            return;
        }
        self.epoch += 1;
        self.attempts = 0;
        self.status = Status::Idle;
        self.credentials = None;
    }

    /// Reports that the transport for `epoch` connected successfully
    ///
    /// Resets the retry budget. Reports for a superseded epoch are ignored.
    pub fn on_connected(&mut self, epoch: u64) {
        if epoch != self.epoch {
            log::debug!("ignoring connect report for stale epoch {epoch}");
            return;
        }
        self.attempts = 0;
        self.status = Status::Connected;
    }

    /// Reports that the transport for `epoch` failed or dropped
    ///
    /// # Returns
    ///
    /// [`Directive::RetryAfter`] with the next backoff delay while the
    /// retry budget lasts; `None` once the budget is exhausted, at which
    /// point the status is [`Status::Failed`] until
    /// [`ConnectionManager::retry_now`] is called. Reports for a
    /// superseded epoch return `None` without touching anything.
    pub fn on_connection_lost(&mut self, epoch: u64, reason: &str) -> Option<Directive> {
        if epoch != self.epoch {
            log::debug!("ignoring loss report for stale epoch {epoch}");
            return None;
        }
        let credentials = self.credentials.clone()?;

        self.attempts += 1;
        if self.attempts > reconnect::MAX_ATTEMPTS {
            log::warn!("connection to {} failed for good: {reason}", credentials.code);
            self.status = Status::Failed {
                reason: reason.to_string(),
            };
            return None;
        }

        self.status = Status::Reconnecting {
            attempt: self.attempts,
        };
        self.epoch += 1;
        Some(Directive::RetryAfter {
            epoch: self.epoch,
            delay: backoff_delay(self.attempts),
            credentials,
        })
    }

    /// Starts a fresh connection cycle after a hard failure
    ///
    /// # Returns
    ///
    /// A [`Directive::Open`] with a reset retry budget, or `None` when the
    /// status is not [`Status::Failed`].
    pub fn retry_now(&mut self) -> Option<Directive> {
        if !matches!(self.status, Status::Failed { .. }) {
            return None;
        }
        let credentials = self.credentials.clone()?;

        self.epoch += 1;
        self.attempts = 0;
        self.status = Status::Connecting;
        Some(Directive::Open {
            epoch: self.epoch,
            credentials,
        })
    }
}

/// The delay before retry number `attempt` (1-based)
///
/// Doubles from the initial delay, capped at the configured maximum.
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63);
    let millis = reconnect::INITIAL_BACKOFF_MS
        .saturating_mul(1u64 << exponent)
        .min(reconnect::MAX_BACKOFF_MS);
    Duration::from_millis(millis)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn credentials(code: SessionCode) -> Credentials {
        Credentials {
            code,
            id: Id::new(),
            username: "Alice".to_string(),
            role: Role::Player,
        }
    }

    fn open_epoch(directive: &Directive) -> u64 {
        match directive {
            Directive::Open { epoch, .. } | Directive::RetryAfter { epoch, .. } => *epoch,
            Directive::Reuse => panic!("expected an open, got Reuse"),
        }
    }

    #[test]
    fn test_connect_same_code_reuses() {
        let mut manager = ConnectionManager::new();
        let creds = credentials(SessionCode::new());

        let first = manager.connect(creds.clone());
        assert!(matches!(first, Directive::Open { .. }));
        manager.on_connected(open_epoch(&first));

        // Same code while live: nothing to do
        assert_eq!(manager.connect(creds.clone()), Directive::Reuse);
        assert!(manager.is_connected());

        // Also idempotent while the first attempt is still in flight
        let mut pending = ConnectionManager::new();
        let _ = pending.connect(creds.clone());
        assert_eq!(pending.connect(creds), Directive::Reuse);
    }

    #[test]
    fn test_connect_new_code_replaces() {
        let mut manager = ConnectionManager::new();
        let old_code = SessionCode::new();
        let new_code = SessionCode::new();

        let first = manager.connect(credentials(old_code));
        let old_epoch = open_epoch(&first);
        manager.on_connected(old_epoch);

        let second = manager.connect(credentials(new_code));
        let Directive::Open { epoch, credentials } = &second else {
            panic!("expected a fresh open for the new code");
        };
        assert!(*epoch > old_epoch);
        assert_eq!(credentials.code, new_code);
        assert_eq!(manager.code(), Some(new_code));

        // The replaced transport's late loss report lands on a stale epoch
        assert_eq!(manager.on_connection_lost(old_epoch, "dropped"), None);
        assert!(matches!(manager.status(), Status::Connecting));
    }

    #[test]
    fn test_disconnect_is_safe_noop_when_idle() {
        let mut manager = ConnectionManager::new();
        manager.disconnect();
        assert!(matches!(manager.status(), Status::Idle));

        let directive = manager.connect(credentials(SessionCode::new()));
        manager.on_connected(open_epoch(&directive));
        manager.disconnect();
        manager.disconnect();
        assert!(matches!(manager.status(), Status::Idle));
        assert_eq!(manager.code(), None);
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(5), Duration::from_millis(8000));
        // Beyond the cap the delay stays flat
        assert_eq!(backoff_delay(50), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_budget_then_hard_failure() {
        let mut manager = ConnectionManager::new();
        let directive = manager.connect(credentials(SessionCode::new()));
        let mut epoch = open_epoch(&directive);

        for attempt in 1..=reconnect::MAX_ATTEMPTS {
            let retry = manager
                .on_connection_lost(epoch, "refused")
                .unwrap_or_else(|| panic!("attempt {attempt} should retry"));
            assert!(matches!(
                manager.status(),
                Status::Reconnecting { attempt: a } if *a == attempt
            ));
            epoch = open_epoch(&retry);
        }

        // Budget exhausted: hard failure, no automatic retry
        assert_eq!(manager.on_connection_lost(epoch, "refused"), None);
        assert!(matches!(manager.status(), Status::Failed { .. }));
    }

    #[test]
    fn test_retry_now_after_failure_resets_budget() {
        let mut manager = ConnectionManager::new();
        let creds = credentials(SessionCode::new());
        let directive = manager.connect(creds.clone());
        let mut epoch = open_epoch(&directive);
        for _ in 0..=reconnect::MAX_ATTEMPTS {
            if let Some(retry) = manager.on_connection_lost(epoch, "refused") {
                epoch = open_epoch(&retry);
            }
        }
        assert!(matches!(manager.status(), Status::Failed { .. }));

        let reopened = manager.retry_now().unwrap();
        let Directive::Open { credentials, .. } = &reopened else {
            panic!("expected a fresh open");
        };
        assert_eq!(credentials.code, creds.code);
        assert!(matches!(manager.status(), Status::Connecting));

        // The budget is fresh again
        assert!(
            manager
                .on_connection_lost(open_epoch(&reopened), "refused")
                .is_some()
        );
    }

    #[test]
    fn test_retry_now_only_after_failure() {
        let mut manager = ConnectionManager::new();
        assert_eq!(manager.retry_now(), None);

        let directive = manager.connect(credentials(SessionCode::new()));
        manager.on_connected(open_epoch(&directive));
        assert_eq!(manager.retry_now(), None);
    }

    #[test]
    fn test_successful_connect_resets_attempts() {
        let mut manager = ConnectionManager::new();
        let directive = manager.connect(credentials(SessionCode::new()));
        let epoch = open_epoch(&directive);

        let retry = manager.on_connection_lost(epoch, "refused").unwrap();
        let retry_epoch = open_epoch(&retry);
        manager.on_connected(retry_epoch);
        assert!(manager.is_connected());

        // A later drop starts counting from one again
        let next = manager.on_connection_lost(retry_epoch, "dropped").unwrap();
        let Directive::RetryAfter { delay, .. } = next else {
            panic!("expected a retry");
        };
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[test]
    fn test_stale_connected_report_ignored() {
        let mut manager = ConnectionManager::new();
        let first = manager.connect(credentials(SessionCode::new()));
        let stale = open_epoch(&first);
        manager.disconnect();

        manager.on_connected(stale);
        assert!(matches!(manager.status(), Status::Idle));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Idle.to_string(), "idle");
        assert_eq!(
            Status::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
        assert_eq!(
            Status::Failed {
                reason: "timed out".to_string()
            }
            .to_string(),
            "failed: timed out"
        );
    }
}
