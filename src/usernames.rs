//! Participant username management and validation
//!
//! This module handles the assignment and validation of usernames within
//! a quiz session. It ensures username uniqueness, filters inappropriate
//! content, and maintains the mapping from participant IDs to their
//! usernames.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::roster::Id;

/// Serialization helper for Usernames struct
#[derive(Deserialize)]
struct UsernamesSerde {
    mapping: HashMap<Id, String>,
}

/// Manages usernames and their associations with participant IDs
///
/// This struct maintains the mapping from participant IDs to usernames,
/// ensuring that usernames are unique within a session and meet content
/// and length requirements.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "UsernamesSerde")]
pub struct Usernames {
    /// Primary mapping from participant ID to username
    mapping: HashMap<Id, String>,

    /// Set of all taken usernames for quick uniqueness checks (not serialized)
    #[serde(skip_serializing)]
    existing: HashSet<String>,
}

impl From<UsernamesSerde> for Usernames {
    /// Reconstructs the Usernames struct from serialized data
    ///
    /// This rebuilds the taken-username set from the primary mapping,
    /// which is necessary since the set is not serialized.
    fn from(serde: UsernamesSerde) -> Self {
        let UsernamesSerde { mapping } = serde;
        let existing = mapping.values().cloned().collect();
        Self { mapping, existing }
    }
}

/// Errors that can occur during username validation and assignment
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested username is already in use by another participant
    #[error("username already in-use")]
    Used,
    /// The participant already has an assigned username
    #[error("participant has an existing username")]
    Assigned,
    /// The username is empty or contains only whitespace
    #[error("username cannot be empty")]
    Empty,
    /// The username contains inappropriate content
    #[error("username is inappropriate")]
    Sinful,
    /// The username exceeds the maximum allowed length
    #[error("username is too long")]
    TooLong,
}

impl Usernames {
    /// Retrieves the username associated with a participant ID
    ///
    /// # Arguments
    ///
    /// * `id` - The participant ID to look up
    ///
    /// # Returns
    ///
    /// The participant's username if they have one assigned, otherwise `None`
    pub fn get_username(&self, id: &Id) -> Option<String> {
        self.mapping.get(id).map(std::borrow::ToOwned::to_owned)
    }

    /// Assigns a username to a participant after validation
    ///
    /// This method performs comprehensive validation including length limits,
    /// content filtering, uniqueness checking, and ensures the participant
    /// doesn't already have a username assigned.
    ///
    /// # Arguments
    ///
    /// * `id` - The participant ID to assign the username to
    /// * `username` - The requested username (will be trimmed of whitespace)
    ///
    /// # Returns
    ///
    /// The cleaned and assigned username on success, or an error describing
    /// why the username was rejected.
    ///
    /// # Errors
    ///
    /// * `Error::TooLong` - Username exceeds the maximum length
    /// * `Error::Empty` - Username is empty after trimming whitespace
    /// * `Error::Sinful` - Username contains inappropriate content
    /// * `Error::Used` - Username is already taken by another participant
    /// * `Error::Assigned` - Participant already has a username assigned
    pub fn set_username(&mut self, id: Id, username: &str) -> Result<String, Error> {
        if username.len() > crate::constants::username::MAX_LENGTH {
            return Err(Error::TooLong);
        }
        let username = rustrict::trim_whitespace(username);
        if username.is_empty() {
            return Err(Error::Empty);
        }
        if username.is_inappropriate() {
            return Err(Error::Sinful);
        }
        if !self.existing.insert(username.to_owned()) {
            return Err(Error::Used);
        }
        match self.mapping.entry(id) {
            Entry::Occupied(_) => Err(Error::Assigned),
            Entry::Vacant(v) => {
                v.insert(username.to_owned());
                Ok(username.to_owned())
            }
        }
    }

    /// Releases the username held by a participant
    ///
    /// Called when a participant leaves the session so the username becomes
    /// available again. Safe to call when the participant holds no username.
    ///
    /// # Arguments
    ///
    /// * `id` - The participant ID whose username should be released
    pub fn release(&mut self, id: &Id) {
        if let Some(username) = self.mapping.remove(id) {
            self.existing.remove(&username);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_usernames_set_and_get() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        let result = usernames.set_username(id, "TestPlayer");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "TestPlayer");

        assert_eq!(usernames.get_username(&id), Some("TestPlayer".to_string()));
    }

    #[test]
    fn test_usernames_too_long() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        let long = "a".repeat(crate::constants::username::MAX_LENGTH + 1);
        assert_eq!(usernames.set_username(id, &long), Err(Error::TooLong));
    }

    #[test]
    fn test_usernames_max_length_allowed() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        let max = "a".repeat(crate::constants::username::MAX_LENGTH);
        let result = usernames.set_username(id, &max);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), max);
    }

    #[test]
    fn test_usernames_empty() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        assert_eq!(usernames.set_username(id, ""), Err(Error::Empty));
        assert_eq!(usernames.set_username(id, "   "), Err(Error::Empty));
        assert_eq!(usernames.set_username(id, "\t\n"), Err(Error::Empty));
    }

    #[test]
    fn test_usernames_whitespace_trimming() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        let result = usernames.set_username(id, "  TestPlayer  ");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "TestPlayer");
    }

    #[test]
    fn test_usernames_duplicate_error() {
        let mut usernames = Usernames::default();
        let id1 = Id::new();
        let id2 = Id::new();
        let id3 = Id::new();

        usernames.set_username(id1, "Player").unwrap();
        assert_eq!(usernames.set_username(id2, "Player"), Err(Error::Used));

        // Whitespace-trimmed usernames are also considered duplicates
        assert_eq!(usernames.set_username(id3, "  Player  "), Err(Error::Used));
    }

    #[test]
    fn test_usernames_already_assigned_error() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        usernames.set_username(id, "FirstName").unwrap();
        assert_eq!(usernames.set_username(id, "SecondName"), Err(Error::Assigned));

        // Original username should still be there
        assert_eq!(usernames.get_username(&id), Some("FirstName".to_string()));
    }

    #[test]
    fn test_usernames_inappropriate_content() {
        let mut usernames = Usernames::default();
        let id = Id::new();

        for username in ["damn", "fuck", "shit"] {
            assert_eq!(
                usernames.set_username(id, username),
                Err(Error::Sinful),
                "Expected '{username}' to be flagged as inappropriate"
            );
        }
    }

    #[test]
    fn test_usernames_release_frees_username() {
        let mut usernames = Usernames::default();
        let id1 = Id::new();
        let id2 = Id::new();

        usernames.set_username(id1, "Player").unwrap();
        usernames.release(&id1);

        assert_eq!(usernames.get_username(&id1), None);
        assert!(usernames.set_username(id2, "Player").is_ok());
    }

    #[test]
    fn test_usernames_release_unknown_is_noop() {
        let mut usernames = Usernames::default();
        usernames.release(&Id::new());
    }

    #[test]
    fn test_usernames_serialization_round_trip() {
        let mut original = Usernames::default();
        let id1 = Id::new();
        let id2 = Id::new();

        original.set_username(id1, "Alice").unwrap();
        original.set_username(id2, "Bob").unwrap();

        let serialized = serde_json::to_string(&original).unwrap();
        let restored: Usernames = serde_json::from_str(&serialized).unwrap();

        assert_eq!(restored.get_username(&id1), Some("Alice".to_string()));
        assert_eq!(restored.get_username(&id2), Some("Bob".to_string()));
        // Rebuilt uniqueness set still rejects duplicates
        let id3 = Id::new();
        let mut restored = restored;
        assert_eq!(restored.set_username(id3, "Alice"), Err(Error::Used));
    }
}
