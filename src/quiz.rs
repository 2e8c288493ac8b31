//! Quiz and question configuration
//!
//! This module defines the static configuration for a quiz: an ordered
//! sequence of multiple-choice questions with timing, scoring and content
//! constraints. Configuration is immutable once a session activates it;
//! edits are only possible before activation.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds
fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    field: &'static str,
    val: &Duration,
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{field} is outside of the bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// Validates the time limit for answering a question
fn validate_time_limit(val: &Duration) -> ValidationResult {
    validate_duration::<
        { crate::constants::question::MIN_TIME_LIMIT },
        { crate::constants::question::MAX_TIME_LIMIT },
    >("time_limit", val)
}

/// The default per-question time limit
fn default_time_limit() -> Duration {
    Duration::from_secs(crate::constants::question::DEFAULT_TIME_LIMIT)
}

/// Errors produced by whole-quiz consistency checks
///
/// These cover constraints that span multiple fields and therefore fall
/// outside per-field validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A field-level constraint was violated
    #[error("invalid quiz configuration: {0}")]
    Invalid(String),
    /// A question's correct option index does not point at any of its options
    #[error("question {index} has correct_option out of range")]
    CorrectOptionOutOfRange {
        /// Index of the offending question
        index: usize,
    },
    /// The quiz contains no questions
    #[error("quiz has no questions")]
    Empty,
}

/// One selectable answer option within a question
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnswerOption {
    /// Stable identifier for the option, carried through to clients
    #[garde(skip)]
    pub id: String,
    /// The text shown for this option
    #[garde(length(max = crate::constants::question::MAX_OPTION_LENGTH))]
    pub text: String,
}

/// Configuration for a single multiple-choice question
///
/// Defines the content, options, correct answer and timing for one
/// question. The correct option and explanation are never sent to players
/// until the question closes.
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Stable identifier for the question
    #[garde(skip)]
    pub id: String,
    /// The question text displayed to participants
    #[garde(length(max = crate::constants::question::MAX_TEXT_LENGTH))]
    text: String,
    /// The ordered answer options participants choose from
    #[garde(
        length(
            min = crate::constants::question::MIN_OPTION_COUNT,
            max = crate::constants::question::MAX_OPTION_COUNT,
        ),
        dive
    )]
    options: Vec<AnswerOption>,
    /// Index into `options` of the correct answer
    #[garde(skip)]
    correct_option: usize,
    /// Optional explanation revealed alongside the results
    #[garde(inner(length(max = crate::constants::question::MAX_EXPLANATION_LENGTH)))]
    explanation: Option<String>,
    /// How long participants have to answer once the question is activated
    #[garde(custom(|v, _| validate_time_limit(v)))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_time_limit")]
    time_limit: Duration,
}

/// The view of a question that is safe to send to players
///
/// Contains everything needed to render and answer the question but omits
/// the correct option and the explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionView {
    /// The question text
    pub text: String,
    /// The option texts, in selection order
    pub options: Vec<String>,
}

impl Question {
    /// Returns the time limit for answering this question
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Returns the number of answer options
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Returns the index of the correct option
    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    /// Returns the explanation, if one is configured
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// Checks whether a selected option index is the correct answer
    pub fn is_correct(&self, selected_option: usize) -> bool {
        selected_option == self.correct_option
    }

    /// Returns the player-safe view of this question
    pub fn view(&self) -> QuestionView {
        QuestionView {
            text: self.text.clone(),
            options: self.options.iter().map(|o| o.text.clone()).collect(),
        }
    }
}

/// A complete quiz: an ordered sequence of questions plus scoring policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Quiz {
    /// The quiz title
    #[garde(length(max = crate::constants::quiz::MAX_TITLE_LENGTH))]
    pub title: String,
    /// The questions, played in order
    #[garde(length(max = crate::constants::quiz::MAX_QUESTIONS), dive)]
    pub questions: Vec<Question>,
    /// Minimum total score required to pass the quiz
    #[garde(skip)]
    pub passing_score: u64,
}

impl Quiz {
    /// Returns the number of questions in this quiz
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Checks if this quiz contains any questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Returns the question at the given index, if any
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Runs all field-level and cross-field consistency checks
    ///
    /// A quiz must pass this check before a session activates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for a quiz with no questions,
    /// [`Error::CorrectOptionOutOfRange`] when a question's correct option
    /// index does not point at one of its options, or [`Error::Invalid`]
    /// when a field-level constraint fails.
    pub fn check(&self) -> Result<(), Error> {
        if self.questions.is_empty() {
            return Err(Error::Empty);
        }
        self.validate()
            .map_err(|report| Error::Invalid(report.to_string()))?;
        for (index, question) in self.questions.iter().enumerate() {
            if question.correct_option >= question.options.len() {
                return Err(Error::CorrectOptionOutOfRange { index });
            }
        }
        Ok(())
    }
}
