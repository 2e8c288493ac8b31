//! Configuration constants for the quiz session system
//!
//! This module contains all the configuration limits and constraints
//! used throughout the session system to ensure data integrity and
//! provide consistent boundaries for the different components.

/// Session-level configuration constants
pub mod session {
    /// Maximum number of participants allowed in a single session
    pub const MAX_PARTICIPANTS: usize = 1000;
    /// Number of characters in a join code
    pub const CODE_LENGTH: usize = 6;
    /// Seconds of inactivity after which a session is garbage-collected
    pub const INACTIVITY_TIMEOUT: u64 = 3600;
}

/// Quiz-level configuration constants
pub mod quiz {
    /// Maximum number of questions allowed in a single quiz
    pub const MAX_QUESTIONS: usize = 100;
    /// Maximum length of a quiz title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
}

/// Question configuration constants
pub mod question {
    /// Maximum length of the question text in characters
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Maximum length of a single answer option in characters
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Maximum length of the optional explanation in characters
    pub const MAX_EXPLANATION_LENGTH: usize = 500;
    /// Minimum number of answer options per question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options per question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Minimum time limit in seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 5;
    /// Maximum time limit in seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 240;
    /// Default time limit in seconds when a question does not specify one
    pub const DEFAULT_TIME_LIMIT: u64 = 30;
}

/// Username configuration constants
pub mod username {
    /// Maximum length of a participant username in characters
    pub const MAX_LENGTH: usize = 30;
}

/// Scoring configuration constants
pub mod scoring {
    /// Points awarded for a correct answer submitted within the time window
    pub const POINTS_PER_CORRECT: u64 = 100;
}

/// Reconnection budget constants for the connection manager
pub mod reconnect {
    /// Maximum number of automatic reconnection attempts before a hard failure
    pub const MAX_ATTEMPTS: u32 = 5;
    /// Delay in milliseconds before the first reconnection attempt
    pub const INITIAL_BACKOFF_MS: u64 = 500;
    /// Upper bound in milliseconds on the delay between attempts
    pub const MAX_BACKOFF_MS: u64 = 8000;
}
