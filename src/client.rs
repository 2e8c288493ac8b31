//! Client-side session state machine
//!
//! This module mirrors the coordinator's session on the client: it applies
//! [`UpdateMessage`]s incrementally, applies a [`SyncMessage`] as a full
//! replacement, and derives the local countdown for an open question from
//! the server-provided window. The client never closes a question itself;
//! when its countdown reaches zero it emits a [`ClientSignal::TimeUp`] for
//! the embedder to send upstream, and waits for the coordinator's verdict.
//!
//! When an update cannot be reconciled with the local view (a tally larger
//! than the roster, results for a question the client never saw), the
//! machine flags itself as desynchronized and expects the embedder to
//! request a full resync instead of patching incrementally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::{Duration, SystemTime};

use super::{
    coordinator::{FinalStanding, SummaryMessage, SyncMessage, UpdateMessage},
    leaderboard::ScoreMessage,
    quiz::QuestionView,
    roster::Id,
};

/// A roster entry as the client sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// The participant's username
    pub username: String,
    /// When the participant joined
    pub join_time: SystemTime,
}

/// Local view of the currently open question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveQuestion {
    /// Index of the open question
    pub index: usize,
    /// Total number of questions in the quiz
    pub count: usize,
    /// The question content
    pub question: QuestionView,
    /// Index of the correct option, when the server disclosed it (host view)
    pub correct_option: Option<usize>,
    /// Absolute deadline for the local countdown
    pub deadline: SystemTime,
    /// The option this client submitted, if any
    pub own_answer: Option<usize>,
    /// Number of players the server reports as having answered
    pub answered_count: usize,
    /// Per-option response counts, when the server discloses them (host view)
    pub counts: Vec<usize>,
    /// Whether the countdown reaching zero was already reported upstream
    time_up_reported: bool,
}

impl ActiveQuestion {
    /// Time left on the local countdown, clamped to zero
    ///
    /// The clamp means a client that joined after the window elapsed (or
    /// whose clock drifted) never displays a negative remaining time.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.deadline
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

/// Results view of a closed question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResults {
    /// Index of the closed question
    pub index: usize,
    /// Index of the correct option; `None` until the server reveals it
    pub correct_option: Option<usize>,
    /// Explanation for the answer, if one was configured
    pub explanation: Option<String>,
    /// Per-option response counts
    pub counts: Vec<usize>,
    /// This client's score after the question, if ranked
    pub score: Option<ScoreMessage>,
}

/// Final view after the quiz ended
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalView {
    /// Final ranked standings, when broadcast
    pub results: Vec<FinalStanding>,
    /// Role-specific summary, when received
    pub summary: Option<SummaryMessage>,
}

/// The phase of the client's session view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Phase {
    /// No session requested
    Idle,
    /// Waiting for the first full state from the server
    Connecting,
    /// In the waiting room before the quiz starts
    WaitingRoom,
    /// A question is open
    QuestionActive(ActiveQuestion),
    /// A question is closed; showing its results
    QuestionResults(QuestionResults),
    /// The quiz ended
    Ended(FinalView),
}

/// Signals the state machine asks the embedder to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// The local countdown expired; request a close from the coordinator
    ///
    /// Emitted at most once per question. This is a request, never a local
    /// state change: the question stays open until the server closes it.
    TimeUp {
        /// The question index the countdown was for
        question_index: usize,
    },
}

/// Errors from local client actions
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No question is currently open
    #[error("no question is open")]
    NoOpenQuestion,
    /// An answer for the open question was already selected
    #[error("answer already selected")]
    AlreadyAnswered,
    /// The selected option does not exist on the open question
    #[error("selected option is out of range")]
    InvalidOption,
}

/// Client-side replica of one quiz session
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    /// Current phase of the local view
    pub phase: Phase,
    /// Known participants keyed by ID; duplicate joins collapse here
    roster: HashMap<Id, RosterEntry>,
    /// Set when the local view cannot be reconciled with an update
    needs_resync: bool,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

impl ClientSession {
    /// Creates an idle client session
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the session as connecting, awaiting the first sync
    pub fn begin_connecting(&mut self) {
        self.phase = Phase::Connecting;
        self.roster.clear();
        self.needs_resync = false;
    }

    /// Whether the client must request a full resync
    ///
    /// Set when an update contradicts the local view; cleared by
    /// [`ClientSession::apply_sync`].
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// The known roster, keyed by participant ID
    pub fn roster(&self) -> &HashMap<Id, RosterEntry> {
        &self.roster
    }

    /// Selects an answer option locally
    ///
    /// Records the selection so repeated taps cannot produce duplicate
    /// submissions; the embedder sends the returned option index upstream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoOpenQuestion`] outside an open question,
    /// [`Error::AlreadyAnswered`] on a second selection, or
    /// [`Error::InvalidOption`] for an out-of-range index.
    pub fn select_option(&mut self, option: usize) -> Result<usize, Error> {
        let Phase::QuestionActive(active) = &mut self.phase else {
            return Err(Error::NoOpenQuestion);
        };

        if option >= active.question.options.len() {
            return Err(Error::InvalidOption);
        }
        if active.own_answer.is_some() {
            return Err(Error::AlreadyAnswered);
        }

        active.own_answer = Some(option);
        Ok(option)
    }

    /// Advances the local countdown
    ///
    /// # Returns
    ///
    /// [`ClientSignal::TimeUp`] exactly once when the countdown for the
    /// open question reaches zero; `None` otherwise.
    pub fn tick(&mut self, now: SystemTime) -> Option<ClientSignal> {
        let Phase::QuestionActive(active) = &mut self.phase else {
            return None;
        };

        if active.remaining(now).is_zero() && !active.time_up_reported {
            active.time_up_reported = true;
            return Some(ClientSignal::TimeUp {
                question_index: active.index,
            });
        }

        None
    }

    /// Applies an incremental update from the coordinator
    ///
    /// Updates that contradict the local view set the resync flag and
    /// otherwise leave the state alone.
    pub fn apply_update(&mut self, message: UpdateMessage) {
        match message {
            UpdateMessage::ParticipantJoined {
                id,
                username,
                join_time,
            } => {
                // Insert is idempotent for a repeated join of the same ID
                self.roster.insert(
                    id,
                    RosterEntry {
                        username,
                        join_time,
                    },
                );
            }
            UpdateMessage::ParticipantLeft { id } => {
                self.roster.remove(&id);
            }
            UpdateMessage::WaitingScreen(_) => {}
            UpdateMessage::QuestionBegin {
                index,
                count,
                question,
                correct_option,
                time_limit,
                started_at,
            } => {
                let option_count = question.options.len();
                self.phase = Phase::QuestionActive(ActiveQuestion {
                    index,
                    count,
                    question,
                    correct_option,
                    deadline: started_at + time_limit,
                    own_answer: None,
                    answered_count: 0,
                    counts: vec![0; option_count],
                    time_up_reported: false,
                });
            }
            UpdateMessage::AnswerTally { counts, answered } => {
                let Phase::QuestionActive(active) = &mut self.phase else {
                    self.needs_resync = true;
                    return;
                };
                if answered > self.roster.len() {
                    // More answers than known participants; our roster view
                    // is stale
                    log::warn!("answer tally exceeds known roster, requesting resync");
                    self.needs_resync = true;
                    return;
                }
                active.answered_count = answered;
                active.counts = counts;
            }
            UpdateMessage::QuestionEnd {
                index,
                correct_option,
                explanation,
                counts,
            } => {
                match &self.phase {
                    Phase::QuestionActive(active) if active.index != index => {
                        log::warn!("results for unknown question {index}, requesting resync");
                        self.needs_resync = true;
                        return;
                    }
                    _ => {}
                }
                self.phase = Phase::QuestionResults(QuestionResults {
                    index,
                    correct_option: Some(correct_option),
                    explanation,
                    counts,
                    score: None,
                });
            }
            UpdateMessage::Leaderboard { .. } => {}
            UpdateMessage::Score { score } => {
                if let Phase::QuestionResults(results) = &mut self.phase {
                    results.score = score;
                }
            }
            UpdateMessage::QuizEnded { results } => {
                self.phase = Phase::Ended(FinalView {
                    results,
                    summary: None,
                });
            }
            UpdateMessage::Summary(summary) => match &mut self.phase {
                Phase::Ended(view) => view.summary = Some(summary),
                _ => {
                    self.phase = Phase::Ended(FinalView {
                        results: Vec::new(),
                        summary: Some(summary),
                    });
                }
            },
        }
    }

    /// Applies a full-state sync, replacing the local view
    ///
    /// Clears the resync flag. A sync describing an open question whose
    /// window already elapsed lands directly in the results view, so a
    /// late joiner never sees a dead countdown.
    pub fn apply_sync(&mut self, message: SyncMessage, now: SystemTime) {
        self.needs_resync = false;

        match message {
            SyncMessage::WaitingRoom { .. } => {
                self.phase = Phase::WaitingRoom;
            }
            SyncMessage::QuestionActive {
                index,
                count,
                question,
                correct_option,
                remaining,
                answered_count,
            } => {
                if remaining.is_zero() {
                    // The window is over; the close broadcast will fill in
                    // the reveal
                    self.phase = Phase::QuestionResults(QuestionResults {
                        index,
                        correct_option: None,
                        explanation: None,
                        counts: vec![0; question.options.len()],
                        score: None,
                    });
                    return;
                }
                let option_count = question.options.len();
                self.phase = Phase::QuestionActive(ActiveQuestion {
                    index,
                    count,
                    question,
                    correct_option,
                    deadline: now + remaining,
                    own_answer: None,
                    answered_count,
                    counts: vec![0; option_count],
                    time_up_reported: false,
                });
            }
            SyncMessage::QuestionResults {
                index,
                correct_option,
                explanation,
                counts,
                score,
                ..
            } => {
                self.phase = Phase::QuestionResults(QuestionResults {
                    index,
                    correct_option: Some(correct_option),
                    explanation,
                    counts,
                    score,
                });
            }
            SyncMessage::Metainfo(_) => {}
            SyncMessage::Summary(summary) => {
                self.phase = Phase::Ended(FinalView {
                    results: Vec::new(),
                    summary: Some(summary),
                });
            }
            SyncMessage::NotAllowed => {
                self.phase = Phase::Idle;
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn view() -> QuestionView {
        QuestionView {
            text: "Pick one".to_string(),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        }
    }

    fn begin(index: usize, started_at: SystemTime, time_limit: Duration) -> UpdateMessage {
        UpdateMessage::QuestionBegin {
            index,
            count: 2,
            question: view(),
            correct_option: None,
            time_limit,
            started_at,
        }
    }

    fn joined(id: Id, username: &str) -> UpdateMessage {
        UpdateMessage::ParticipantJoined {
            id,
            username: username.to_string(),
            join_time: SystemTime::now(),
        }
    }

    #[test]
    fn test_duplicate_join_collapses_in_roster() {
        let mut client = ClientSession::new();
        let id = Id::new();

        client.apply_update(joined(id, "Alice"));
        client.apply_update(joined(id, "Alice"));

        assert_eq!(client.roster().len(), 1);
    }

    #[test]
    fn test_participant_left_removes_entry() {
        let mut client = ClientSession::new();
        let id = Id::new();

        client.apply_update(joined(id, "Alice"));
        client.apply_update(UpdateMessage::ParticipantLeft { id });

        assert!(client.roster().is_empty());
    }

    #[test]
    fn test_countdown_counts_down_and_clamps() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(0, now, Duration::from_secs(30)));

        let Phase::QuestionActive(active) = &client.phase else {
            panic!("expected active question");
        };
        assert_eq!(active.remaining(now), Duration::from_secs(30));
        assert_eq!(
            active.remaining(now + Duration::from_secs(10)),
            Duration::from_secs(20)
        );
        // Past the deadline the countdown clamps to zero, never negative
        assert_eq!(
            active.remaining(now + Duration::from_secs(90)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_tick_emits_time_up_once() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(3, now, Duration::from_secs(30)));

        assert_eq!(client.tick(now + Duration::from_secs(10)), None);

        let expired = now + Duration::from_secs(31);
        assert_eq!(
            client.tick(expired),
            Some(ClientSignal::TimeUp { question_index: 3 })
        );
        // Reported once; the question stays open until the server closes it
        assert_eq!(client.tick(expired + Duration::from_secs(5)), None);
        assert!(matches!(client.phase, Phase::QuestionActive(_)));
    }

    #[test]
    fn test_select_option_once() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(0, now, Duration::from_secs(30)));

        assert_eq!(client.select_option(1), Ok(1));
        assert_eq!(client.select_option(2), Err(Error::AlreadyAnswered));
        assert_eq!(client.select_option(9), Err(Error::InvalidOption));
    }

    #[test]
    fn test_select_option_requires_open_question() {
        let mut client = ClientSession::new();
        assert_eq!(client.select_option(0), Err(Error::NoOpenQuestion));
    }

    #[test]
    fn test_question_end_moves_to_results() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(0, now, Duration::from_secs(30)));
        client.apply_update(
            UpdateMessage::QuestionEnd {
                index: 0,
                correct_option: 2,
                explanation: Some("because".to_string()),
                counts: vec![1, 0, 4],
            },
        );

        let Phase::QuestionResults(results) = &client.phase else {
            panic!("expected results");
        };
        assert_eq!(results.correct_option, Some(2));
        assert_eq!(results.counts, vec![1, 0, 4]);
        assert!(!client.needs_resync());
    }

    #[test]
    fn test_results_for_other_question_flags_desync() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(0, now, Duration::from_secs(30)));
        client.apply_update(
            UpdateMessage::QuestionEnd {
                index: 7,
                correct_option: 0,
                explanation: None,
                counts: vec![0, 0, 0],
            },
        );

        assert!(client.needs_resync());
        // Local view untouched pending the resync
        assert!(matches!(client.phase, Phase::QuestionActive(_)));
    }

    #[test]
    fn test_tally_exceeding_roster_flags_desync() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(joined(Id::new(), "Alice"));
        client.apply_update(begin(0, now, Duration::from_secs(30)));

        client.apply_update(
            UpdateMessage::AnswerTally {
                counts: vec![3, 1, 1],
                answered: 5,
            },
        );

        assert!(client.needs_resync());
    }

    #[test]
    fn test_tally_within_roster_applies() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        for name in ["Alice", "Bob", "Carol"] {
            client.apply_update(joined(Id::new(), name));
        }
        client.apply_update(begin(0, now, Duration::from_secs(30)));
        client.apply_update(
            UpdateMessage::AnswerTally {
                counts: vec![1, 1, 0],
                answered: 2,
            },
        );

        let Phase::QuestionActive(active) = &client.phase else {
            panic!("expected active question");
        };
        assert_eq!(active.answered_count, 2);
        assert_eq!(active.counts, vec![1, 1, 0]);
        assert!(!client.needs_resync());
    }

    #[test]
    fn test_sync_with_zero_remaining_lands_in_results() {
        let mut client = ClientSession::new();
        client.begin_connecting();
        let now = SystemTime::now();

        client.apply_sync(
            SyncMessage::QuestionActive {
                index: 1,
                count: 2,
                question: view(),
                correct_option: None,
                remaining: Duration::ZERO,
                answered_count: 3,
            },
            now,
        );

        let Phase::QuestionResults(results) = &client.phase else {
            panic!("expected results for an elapsed window");
        };
        assert_eq!(results.index, 1);
        assert_eq!(results.correct_option, None);
    }

    #[test]
    fn test_sync_with_time_left_resumes_countdown() {
        let mut client = ClientSession::new();
        client.begin_connecting();
        let now = SystemTime::now();

        client.apply_sync(
            SyncMessage::QuestionActive {
                index: 1,
                count: 2,
                question: view(),
                correct_option: None,
                remaining: Duration::from_secs(12),
                answered_count: 3,
            },
            now,
        );

        let Phase::QuestionActive(active) = &client.phase else {
            panic!("expected active question");
        };
        assert_eq!(active.remaining(now), Duration::from_secs(12));
        assert_eq!(active.answered_count, 3);
    }

    #[test]
    fn test_sync_clears_desync_flag() {
        let mut client = ClientSession::new();
        let now = SystemTime::now();
        client.apply_update(begin(0, now, Duration::from_secs(30)));
        client.apply_update(
            UpdateMessage::QuestionEnd {
                index: 9,
                correct_option: 0,
                explanation: None,
                counts: vec![],
            },
        );
        assert!(client.needs_resync());

        client.apply_sync(
            SyncMessage::WaitingRoom {
                title: "Quiz".to_string(),
                participants: crate::TruncatedVec::default(),
            },
            now,
        );

        assert!(!client.needs_resync());
        assert!(matches!(client.phase, Phase::WaitingRoom));
    }

    #[test]
    fn test_quiz_ended_then_summary() {
        let mut client = ClientSession::new();
        client.apply_update(UpdateMessage::QuizEnded {
            results: Vec::new(),
        });
        client.apply_update(UpdateMessage::Summary(SummaryMessage::Player {
            score: None,
            points: vec![100, 0],
            passed: true,
        }));

        let Phase::Ended(view) = &client.phase else {
            panic!("expected ended view");
        };
        assert!(matches!(
            view.summary,
            Some(SummaryMessage::Player { passed: true, .. })
        ));
    }
}
