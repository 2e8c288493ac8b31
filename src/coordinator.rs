//! Authoritative quiz session state machine
//!
//! This module contains the coordinator for a single quiz session. The
//! coordinator owns the quiz configuration, the participant roster, the
//! per-question answer records and the score book, and it is the single
//! authority over the question lifecycle: clients (including the host's
//! local countdown) only ever request transitions, they never apply them
//! locally.
//!
//! All timing is injected: the embedding runtime schedules
//! [`AlarmMessage`]s and delivers them back via [`Session::receive_alarm`],
//! so the coordinator closes every question even if no client reports its
//! timer expiring.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use web_time::{Duration, SystemTime};

use super::{
    TruncatedVec,
    leaderboard::{self, Projection, ScoreBook, ScoreMessage},
    quiz::{Quiz, QuestionView},
    roster::{Id, Member, Participant, Role, Roster},
    session::Tunnel,
    usernames::{self, Usernames},
};

/// The phase a session is currently in
///
/// A session starts in the lobby, then alternates between an open question
/// and its results until the quiz ends. There is no current question index
/// while in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting room before the host starts the quiz
    Lobby,
    /// A question is open and accepting answers
    Question(CurrentQuestion),
    /// A question is closed and its results are shown
    Results {
        /// Index of the closed question
        index: usize,
        /// Response counts per option recorded at close time
        counts: Vec<usize>,
    },
    /// The quiz has ended and final results are available
    Ended,
}

/// Runtime state of the currently open question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentQuestion {
    /// Index of the open question within the quiz
    pub(crate) index: usize,
    /// When the question was activated; remaining time derives from this
    pub(crate) started_at: SystemTime,
    /// Accepted answers: one entry per player, recorded with submission time
    pub(crate) answers: HashMap<Id, (usize, SystemTime)>,
}

/// Messages received from session participants
///
/// Messages are categorized by the sender's role so that a participant can
/// only issue the commands its role permits.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum IncomingMessage {
    /// Commands from the session host
    Host(IncomingHostMessage),
    /// Messages from players
    Player(IncomingPlayerMessage),
    /// Advisory from any client whose local countdown reached zero
    ///
    /// The coordinator is authoritative: late, duplicate or spurious
    /// reports are tolerated and never reopen a question.
    TimeUp {
        /// The question index the client believes timed out
        question_index: usize,
    },
}

/// Commands that can be sent by the session host
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub enum IncomingHostMessage {
    /// Start the quiz from the lobby, opening the first question
    Start,
    /// Advance from a closed question's results to the next question
    Next,
    /// Close the currently open question
    EndQuestion,
    /// End the whole quiz immediately
    EndQuiz,
    /// Lock or unlock the session to new participants
    Lock(bool),
}

/// Messages that can be sent by players
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum IncomingPlayerMessage {
    /// Submit an answer to the currently open question
    SubmitAnswer {
        /// The question index the answer targets
        question_index: usize,
        /// Index of the selected option
        selected_option: usize,
    },
}

impl IncomingMessage {
    /// Validates that a message matches the sender's role
    fn follows(&self, sender_role: Role) -> bool {
        matches!(
            (self, sender_role),
            (IncomingMessage::Host(_), Role::Host)
                | (IncomingMessage::Player(_), Role::Player)
                | (IncomingMessage::TimeUp { .. }, _)
        )
    }
}

/// Scheduled alarm messages for coordinator-driven timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// The answering window for a question has elapsed
    QuestionDeadline {
        /// Index of the question whose deadline fired
        index: usize,
    },
}

/// One entry of the final results, with the pass/fail verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStanding {
    /// The player's ID
    pub id: Id,
    /// The player's username
    pub username: String,
    /// The player's final score
    pub score: u64,
    /// Final position (1-indexed)
    pub position: usize,
    /// Whether the player's score reached the quiz's passing score
    pub passed: bool,
}

/// Update messages sent to participants about session changes
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum UpdateMessage {
    /// A participant joined the session
    ParticipantJoined {
        /// The joining player's ID
        id: Id,
        /// The joining player's username
        username: String,
        /// When the player joined
        join_time: SystemTime,
    },
    /// A participant left the session
    ParticipantLeft {
        /// The departing player's ID
        id: Id,
    },
    /// Waiting room roster for the host's lobby display
    WaitingScreen(TruncatedVec<String>),
    /// A question opened and is accepting answers
    QuestionBegin {
        /// Index of the question
        index: usize,
        /// Total number of questions in the quiz
        count: usize,
        /// The question content, without the correct answer
        question: QuestionView,
        /// Index of the correct option; present for the host only
        #[serde(default)]
        correct_option: Option<usize>,
        /// The answering window
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        time_limit: Duration,
        /// When the window opened; clients derive their countdown from this
        started_at: SystemTime,
    },
    /// (HOST ONLY) Aggregate answer counts for the open question
    ///
    /// Carries no identities and no correctness information.
    AnswerTally {
        /// Number of responses per option, in option order
        counts: Vec<usize>,
        /// Total number of players who have answered
        answered: usize,
    },
    /// The question closed; correct answer and distribution revealed
    QuestionEnd {
        /// Index of the closed question
        index: usize,
        /// Index of the correct option
        correct_option: usize,
        /// Explanation for the answer, if configured
        #[serde(default)]
        explanation: Option<String>,
        /// Number of responses per option, in option order
        counts: Vec<usize>,
    },
    /// (HOST ONLY) Current leaderboard after a question closed
    Leaderboard {
        /// The ranked projection of the roster
        projection: Projection,
    },
    /// (PLAYER ONLY) The player's own score after a question closed
    Score {
        /// Points and position, if the player is ranked
        #[serde(default)]
        score: Option<ScoreMessage>,
    },
    /// The quiz ended; final ranked results with pass/fail verdicts
    QuizEnded {
        /// Final standings, best first
        results: Vec<FinalStanding>,
    },
    /// End-of-quiz summary, specific to the recipient's role
    Summary(SummaryMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Sync messages carrying the full state a client needs after (re)joining
///
/// A client recovering from a disconnect receives exactly one of these
/// rather than a replay of missed updates.
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum SyncMessage {
    /// The session is in the lobby
    WaitingRoom {
        /// The quiz title
        title: String,
        /// Usernames of players in the room
        participants: TruncatedVec<String>,
    },
    /// A question is open
    QuestionActive {
        /// Index of the open question
        index: usize,
        /// Total number of questions
        count: usize,
        /// The question content, without the correct answer
        question: QuestionView,
        /// Index of the correct option; present for the host only
        #[serde(default)]
        correct_option: Option<usize>,
        /// Time left in the answering window, clamped to zero
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        remaining: Duration,
        /// Number of players who have already answered
        answered_count: usize,
    },
    /// A question is closed and its results are shown
    QuestionResults {
        /// Index of the closed question
        index: usize,
        /// Total number of questions
        count: usize,
        /// Index of the correct option
        correct_option: usize,
        /// Explanation for the answer, if configured
        #[serde(default)]
        explanation: Option<String>,
        /// Number of responses per option, in option order
        counts: Vec<usize>,
        /// Ranked roster projection; present for the host only
        #[serde(default)]
        projection: Option<Projection>,
        /// The recipient's own score; present for players only
        #[serde(default)]
        score: Option<ScoreMessage>,
    },
    /// Session metadata for the recipient
    Metainfo(MetainfoMessage),
    /// The quiz ended
    Summary(SummaryMessage),
    /// The recipient is not allowed to participate
    NotAllowed,
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Metadata about the session for a specific recipient
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum MetainfoMessage {
    /// Information for the host
    Host {
        /// Whether the session is locked to new participants
        locked: bool,
    },
    /// Information for players
    Player {
        /// The player's current total score
        score: u64,
    },
}

/// End-of-quiz summary, shaped by the recipient's role
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum SummaryMessage {
    /// Summary for a player
    Player {
        /// Final score and position
        #[serde(default)]
        score: Option<ScoreMessage>,
        /// Points earned on each question, in question order
        points: Vec<u64>,
        /// Whether the player reached the passing score
        passed: bool,
    },
    /// Summary for the host
    Host {
        /// Per-question statistics: (players who scored, players who didn't)
        stats: Vec<(usize, usize)>,
        /// Total number of players who participated
        player_count: usize,
    },
}

/// Errors returned when a participant's command is rejected
///
/// Rejections never mutate session state; a rejected command leaves the
/// session exactly as it was.
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// A host-only command was issued by a non-host participant
    #[error("command requires the host role")]
    NotHost,
    /// The sender is not on the session roster
    #[error("sender is not a session participant")]
    UnknownParticipant,
    /// Start was requested but the quiz has already started
    #[error("quiz has already started")]
    AlreadyStarted,
    /// Next was requested while a question is still open
    #[error("current question is still open")]
    QuestionOpen,
    /// The targeted question is not open for answers
    #[error("question is closed")]
    QuestionClosed,
    /// The player already has an accepted answer for this question
    #[error("answer already recorded for this question")]
    DuplicateAnswer,
    /// The selected option index does not exist on this question
    #[error("selected option is out of range")]
    InvalidOption,
    /// A gameplay command arrived before the quiz started
    #[error("quiz has not started")]
    NotStarted,
}

/// Errors returned when a player cannot join a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The requested username was rejected
    #[error("username rejected: {0}")]
    Username(#[from] usernames::Error),
    /// The roster refused the new member
    #[error(transparent)]
    Roster(#[from] super::roster::Error),
    /// The host has locked the session to new participants
    #[error("session is locked")]
    Locked,
}

/// The authoritative state of one quiz session
///
/// All mutation goes through `&mut self` methods, so broadcasts are emitted
/// in mutation order; interleaving of independent sessions is unconstrained.
#[derive(Serialize, Deserialize)]
pub struct Session {
    /// The quiz being played
    quiz: Quiz,
    /// All participants keyed by ID
    pub roster: Roster,
    /// Username assignments and uniqueness bookkeeping
    usernames: Usernames,
    /// Points earned per question, for final summaries
    scores: ScoreBook,
    /// Current phase of the session
    pub phase: Phase,
    /// Whether the session rejects new participants
    locked: bool,
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("quiz", &self.quiz.title)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a new session for a checked quiz with the given host
    ///
    /// # Errors
    ///
    /// Returns the quiz's consistency-check error if the configuration is
    /// invalid; a session never activates an invalid quiz.
    pub fn new(quiz: Quiz, host_id: Id) -> Result<Self, super::quiz::Error> {
        quiz.check()?;
        Ok(Self {
            quiz,
            roster: Roster::with_host(host_id),
            usernames: Usernames::default(),
            scores: ScoreBook::default(),
            phase: Phase::Lobby,
            locked: false,
        })
    }

    /// Returns whether the session has ended
    pub fn is_ended(&self) -> bool {
        matches!(self.phase, Phase::Ended)
    }

    /// Returns whether the session is locked to new participants
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of players who have answered the current question
    fn answered_count(&self) -> usize {
        match &self.phase {
            Phase::Question(current) => current.answers.len(),
            _ => 0,
        }
    }

    /// The ranked projection of the current roster
    fn projection(&self) -> Projection {
        leaderboard::project(self.roster.players(), self.answered_count())
    }

    /// Score message for a player, if it is ranked
    fn score(&self, id: Id) -> Option<ScoreMessage> {
        self.projection()
            .standings
            .iter()
            .find(|standing| standing.id == id)
            .map(|standing| ScoreMessage {
                points: standing.score,
                position: standing.position,
            })
    }

    /// Usernames of players for lobby displays
    fn waiting_room_names(&self) -> TruncatedVec<String> {
        const LIMIT: usize = 50;

        let count = self.roster.specific_count(Role::Player);
        TruncatedVec::new(
            self.roster
                .players()
                .sorted_by_key(|(_, p)| p.join_time)
                .map(|(_, p)| p.username.clone()),
            LIMIT,
            count,
        )
    }

    /// Per-option response counts for a set of recorded answers
    fn tally(&self, index: usize, answers: &HashMap<Id, (usize, SystemTime)>) -> Vec<usize> {
        let option_count = self.quiz.question(index).map_or(0, super::quiz::Question::option_count);
        let chosen = answers.values().map(|(option, _)| *option).counts();
        (0..option_count)
            .map(|option| *chosen.get(&option).unwrap_or(&0))
            .collect_vec()
    }

    /// Adds a player to the session
    ///
    /// Joining is idempotent: a player already on the roster keeps its
    /// record and username and simply receives a fresh state sync, so a
    /// rejoin after a dropped connection never creates a duplicate entry.
    ///
    /// # Arguments
    ///
    /// * `id` - The joining player's ID
    /// * `requested_username` - The username the player asked for
    /// * `tunnel_finder` - Function to find active communication tunnels
    ///
    /// # Returns
    ///
    /// The assigned username.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Locked`] when the host locked the session,
    /// [`JoinError::Username`] when the username is rejected, or
    /// [`JoinError::Roster`] when the session is full.
    pub fn add_player<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        id: Id,
        requested_username: &str,
        tunnel_finder: F,
    ) -> Result<String, JoinError> {
        if let Some(username) = self.roster.get_username(&id) {
            // Rejoin: resync instead of inserting a second entry
            self.update_session(id, tunnel_finder);
            return Ok(username);
        }

        if self.locked {
            return Err(JoinError::Locked);
        }

        let username = self.usernames.set_username(id, requested_username)?;
        let join_time = SystemTime::now();

        if let Err(e) = self
            .roster
            .add_member(id, Member::Player(Participant::new(username.clone(), join_time)))
        {
            self.usernames.release(&id);
            return Err(e.into());
        }

        log::debug!("player {id} joined as {username:?}");

        self.roster.announce(
            &UpdateMessage::ParticipantJoined {
                id,
                username: username.clone(),
                join_time,
            },
            &tunnel_finder,
        );

        if matches!(self.phase, Phase::Lobby) {
            self.roster.announce_specific(
                Role::Host,
                &UpdateMessage::WaitingScreen(self.waiting_room_names()),
                &tunnel_finder,
            );
        }

        self.roster
            .send_state(&self.state_message(id, Role::Player), id, &tunnel_finder);

        Ok(username)
    }

    /// Removes a participant from the session
    ///
    /// Releases the username, closes the tunnel if one is active and
    /// notifies the remaining participants. Removing an unknown ID is a
    /// no-op.
    pub fn remove_participant<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        id: &Id,
        tunnel_finder: F,
    ) {
        if self.roster.remove_member(id).is_none() {
            return;
        }

        self.usernames.release(id);
        Roster::close_tunnel(id, &tunnel_finder);

        self.roster
            .announce(&UpdateMessage::ParticipantLeft { id: *id }, &tunnel_finder);

        if matches!(self.phase, Phase::Lobby) {
            self.roster.announce_specific(
                Role::Host,
                &UpdateMessage::WaitingScreen(self.waiting_room_names()),
                &tunnel_finder,
            );
        }
    }

    /// Handles an incoming message from a participant
    ///
    /// The message is checked against the sender's role and the current
    /// phase; rejected commands leave the session unchanged.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing why the command was rejected.
    /// [`CommandError::DuplicateAnswer`] is advisory rather than fatal: the
    /// first accepted answer stands and the session is unchanged.
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        sender_id: Id,
        message: IncomingMessage,
        mut schedule_message: S,
        tunnel_finder: F,
    ) -> Result<(), CommandError> {
        let Some(member) = self.roster.get_member(&sender_id) else {
            return Err(CommandError::UnknownParticipant);
        };

        if !message.follows(member.role()) {
            return match message {
                IncomingMessage::Host(_) => Err(CommandError::NotHost),
                // Player messages from the host are dropped, not errors
                _ => Ok(()),
            };
        }

        match message {
            IncomingMessage::Host(IncomingHostMessage::Lock(lock_state)) => {
                self.locked = lock_state;
                Ok(())
            }
            IncomingMessage::Host(IncomingHostMessage::Start) => match self.phase {
                Phase::Lobby => {
                    self.begin_question(0, &mut schedule_message, &tunnel_finder);
                    Ok(())
                }
                _ => Err(CommandError::AlreadyStarted),
            },
            IncomingMessage::Host(IncomingHostMessage::Next) => match self.phase {
                Phase::Lobby => Err(CommandError::NotStarted),
                Phase::Question(_) => Err(CommandError::QuestionOpen),
                Phase::Results { index, .. } => {
                    self.begin_question(index + 1, &mut schedule_message, &tunnel_finder);
                    Ok(())
                }
                // A second Next after the final results must not advance
                Phase::Ended => Ok(()),
            },
            IncomingMessage::Host(IncomingHostMessage::EndQuestion) => {
                // Idempotent: closing an already-closed question is a no-op
                if let Phase::Question(current) = &self.phase {
                    let index = current.index;
                    self.close_question(index, &tunnel_finder);
                }
                Ok(())
            }
            IncomingMessage::Host(IncomingHostMessage::EndQuiz) => {
                if !self.is_ended() {
                    self.end_quiz(&tunnel_finder);
                }
                Ok(())
            }
            IncomingMessage::TimeUp { question_index } => {
                // Advisory only; stale or repeated reports are ignored
                if let Phase::Question(current) = &self.phase {
                    if current.index == question_index {
                        self.close_question(question_index, &tunnel_finder);
                    }
                }
                Ok(())
            }
            IncomingMessage::Player(IncomingPlayerMessage::SubmitAnswer {
                question_index,
                selected_option,
            }) => self.submit_answer(sender_id, question_index, selected_option, &tunnel_finder),
        }
    }

    /// Handles a scheduled alarm
    ///
    /// The deadline alarm carries the index it was scheduled for, so an
    /// alarm firing after its question already closed (or after the host
    /// advanced) matches nothing and is dropped.
    pub fn receive_alarm<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        message: &AlarmMessage,
        tunnel_finder: F,
    ) {
        match message {
            AlarmMessage::QuestionDeadline { index } => {
                if let Phase::Question(current) = &self.phase {
                    if current.index == *index {
                        log::debug!("question {index} reached its deadline");
                        self.close_question(*index, &tunnel_finder);
                    }
                }
            }
        }
    }

    /// Records a player's answer to the open question
    fn submit_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player_id: Id,
        question_index: usize,
        selected_option: usize,
        tunnel_finder: F,
    ) -> Result<(), CommandError> {
        let Phase::Question(current) = &mut self.phase else {
            return Err(CommandError::QuestionClosed);
        };

        if current.index != question_index {
            return Err(CommandError::QuestionClosed);
        }

        let question = self
            .quiz
            .question(question_index)
            .ok_or(CommandError::QuestionClosed)?;

        if selected_option >= question.option_count() {
            return Err(CommandError::InvalidOption);
        }

        if current.answers.contains_key(&player_id) {
            return Err(CommandError::DuplicateAnswer);
        }

        current
            .answers
            .insert(player_id, (selected_option, SystemTime::now()));
        self.roster.record_answered(&player_id);

        let Phase::Question(current) = &self.phase else {
            unreachable!("phase checked above");
        };

        let connected_players: HashSet<Id> = self
            .roster
            .players()
            .map(|(id, _)| id)
            .filter(|id| Roster::is_alive(*id, &tunnel_finder))
            .collect();
        let answered: HashSet<Id> = current.answers.keys().copied().collect();

        if !connected_players.is_empty() && connected_players.is_subset(&answered) {
            // Every connected player has answered; no reason to wait out
            // the clock
            self.close_question(question_index, &tunnel_finder);
        } else {
            self.roster.announce_specific(
                Role::Host,
                &UpdateMessage::AnswerTally {
                    counts: self.tally(question_index, &current.answers),
                    answered: current.answers.len(),
                },
                &tunnel_finder,
            );
        }

        Ok(())
    }

    /// Opens the question at `index`, or ends the quiz past the last one
    fn begin_question<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        index: usize,
        schedule_message: &mut S,
        tunnel_finder: F,
    ) {
        let Some(question) = self.quiz.question(index) else {
            self.end_quiz(tunnel_finder);
            return;
        };

        let time_limit = question.time_limit();
        let correct_option = question.correct_option();
        let view = question.view();
        let started_at = SystemTime::now();
        let count = self.quiz.len();

        self.phase = Phase::Question(CurrentQuestion {
            index,
            started_at,
            answers: HashMap::new(),
        });

        log::debug!("question {index} opened with a {time_limit:?} window");

        self.roster.announce_with(
            |_, role| {
                Some(UpdateMessage::QuestionBegin {
                    index,
                    count,
                    question: view.clone(),
                    correct_option: match role {
                        Role::Host => Some(correct_option),
                        Role::Player => None,
                    },
                    time_limit,
                    started_at,
                })
            },
            tunnel_finder,
        );

        schedule_message(AlarmMessage::QuestionDeadline { index }, time_limit);
    }

    /// Closes the question at `index`, scoring all recorded answers
    ///
    /// Only the transition out of the open phase applies scoring, so a
    /// deadline alarm racing a host close (or a client time-up report)
    /// scores at most once.
    fn close_question<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        index: usize,
        tunnel_finder: F,
    ) {
        let answers = match &mut self.phase {
            Phase::Question(current) if current.index == index => {
                std::mem::take(&mut current.answers)
            }
            _ => return,
        };

        let Some(question) = self.quiz.question(index) else {
            return;
        };
        let correct_option = question.correct_option();
        let explanation = question.explanation().map(str::to_owned);

        let counts = self.tally(index, &answers);
        self.phase = Phase::Results {
            index,
            counts: counts.clone(),
        };

        // Zero-filled round: every player gets an entry even without an
        // accepted answer
        let round = self
            .roster
            .players()
            .map(|(id, _)| {
                let earned = match answers.get(&id) {
                    Some((option, _)) if question.is_correct(*option) => {
                        crate::constants::scoring::POINTS_PER_CORRECT
                    }
                    _ => 0,
                };
                (id, earned)
            })
            .collect_vec();

        for (id, earned) in &round {
            if *earned > 0 {
                self.roster.add_points(id, *earned);
            }
        }
        self.scores.add_round(&round);

        log::debug!("question {index} closed with {} answers", answers.len());

        self.roster.announce(
            &UpdateMessage::QuestionEnd {
                index,
                correct_option,
                explanation,
                counts,
            },
            &tunnel_finder,
        );

        let projection = self.projection();
        self.roster.announce_with(
            |id, role| {
                Some(match role {
                    Role::Host => UpdateMessage::Leaderboard {
                        projection: projection.clone(),
                    },
                    Role::Player => UpdateMessage::Score {
                        score: self.score(id),
                    },
                })
            },
            tunnel_finder,
        );
    }

    /// Ends the quiz and announces the final results
    fn end_quiz<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.phase = Phase::Ended;

        log::debug!("quiz {:?} ended", self.quiz.title);

        let results = self.final_standings();

        self.roster.announce(
            &UpdateMessage::QuizEnded {
                results: results.clone(),
            },
            &tunnel_finder,
        );

        self.roster.announce_with(
            |id, role| Some(UpdateMessage::Summary(self.summary(id, role))),
            tunnel_finder,
        );
    }

    /// Final ranked results with the pass/fail verdict applied
    fn final_standings(&self) -> Vec<FinalStanding> {
        self.projection()
            .standings
            .into_iter()
            .map(|standing| FinalStanding {
                passed: standing.score >= self.quiz.passing_score,
                id: standing.id,
                username: standing.username,
                score: standing.score,
                position: standing.position,
            })
            .collect_vec()
    }

    /// The end-of-quiz summary for one recipient
    fn summary(&self, id: Id, role: Role) -> SummaryMessage {
        match role {
            Role::Host => {
                let (player_count, stats) = self.scores.host_summary();
                SummaryMessage::Host {
                    stats,
                    player_count,
                }
            }
            Role::Player => SummaryMessage::Player {
                score: self.score(id),
                points: self.scores.player_summary(id),
                passed: self
                    .roster
                    .participant(&id)
                    .is_some_and(|p| p.score >= self.quiz.passing_score),
            },
        }
    }

    /// Builds the full-state sync message for a participant
    ///
    /// A client joining mid-question with no time left is synced straight
    /// into the results view on its side; the clamp here guarantees the
    /// remaining time is never negative.
    pub fn state_message(&self, id: Id, role: Role) -> SyncMessage {
        match &self.phase {
            Phase::Lobby => SyncMessage::WaitingRoom {
                title: self.quiz.title.clone(),
                participants: self.waiting_room_names(),
            },
            Phase::Question(current) => {
                let Some(question) = self.quiz.question(current.index) else {
                    return SyncMessage::NotAllowed;
                };
                let elapsed = current.started_at.elapsed().unwrap_or_default();
                SyncMessage::QuestionActive {
                    index: current.index,
                    count: self.quiz.len(),
                    question: question.view(),
                    correct_option: match role {
                        Role::Host => Some(question.correct_option()),
                        Role::Player => None,
                    },
                    remaining: question.time_limit().saturating_sub(elapsed),
                    answered_count: current.answers.len(),
                }
            }
            Phase::Results { index, counts } => {
                let Some(question) = self.quiz.question(*index) else {
                    return SyncMessage::NotAllowed;
                };
                SyncMessage::QuestionResults {
                    index: *index,
                    count: self.quiz.len(),
                    correct_option: question.correct_option(),
                    explanation: question.explanation().map(str::to_owned),
                    counts: counts.clone(),
                    projection: match role {
                        Role::Host => Some(self.projection()),
                        Role::Player => None,
                    },
                    score: match role {
                        Role::Host => None,
                        Role::Player => self.score(id),
                    },
                }
            }
            Phase::Ended => SyncMessage::Summary(self.summary(id, role)),
        }
    }

    /// Resynchronizes a participant after it (re)connects
    ///
    /// Sends the role-specific metadata followed by the full state for the
    /// current phase. Unknown IDs are ignored.
    pub fn update_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(member) = self.roster.get_member(&id) else {
            return;
        };
        let role = member.role();

        let metainfo = match role {
            Role::Host => MetainfoMessage::Host {
                locked: self.locked,
            },
            Role::Player => MetainfoMessage::Player {
                score: self.roster.participant(&id).map_or(0, |p| p.score),
            },
        };

        self.roster
            .send_state(&SyncMessage::Metainfo(metainfo), id, &tunnel_finder);
        self.roster
            .send_state(&self.state_message(id, role), id, &tunnel_finder);
    }

    /// Ends the session and disconnects everyone
    ///
    /// Closing an already-ended session is a no-op apart from closing any
    /// tunnels that are still alive.
    pub fn close<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.phase = Phase::Ended;

        let ids = self
            .roster
            .vec(&tunnel_finder)
            .iter()
            .map(|(id, _, _)| *id)
            .collect_vec();

        for id in ids {
            Roster::close_tunnel(&id, &tunnel_finder);
        }
    }
}
