//! Join code generation and parsing
//!
//! This module provides the short, human-shareable codes used to identify
//! live quiz sessions. Codes are drawn from an alphabet with visually
//! ambiguous characters removed so they survive being read aloud or typed
//! from a projected screen.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::session::CODE_LENGTH;

/// Characters allowed in a join code
///
/// Excludes `I`, `L`, `O`, `0` and `1` to avoid confusion between
/// similar-looking glyphs.
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Errors that can occur when parsing a join code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The input is not exactly [`CODE_LENGTH`] characters long
    #[error("join code must be exactly {CODE_LENGTH} characters")]
    InvalidLength,
    /// The input contains a character outside the code alphabet
    #[error("join code contains an invalid character")]
    InvalidCharacter,
}

/// A short identifier for one live quiz session
///
/// Codes are generated randomly and compared case-insensitively; parsing
/// normalizes lowercase input so a code shared verbally round-trips no
/// matter how it is typed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct SessionCode([u8; CODE_LENGTH]);

impl SessionCode {
    /// Creates a new random join code
    pub fn new() -> Self {
        let mut chars = [0u8; CODE_LENGTH];
        for c in &mut chars {
            *c = ALPHABET[fastrand::usize(..ALPHABET.len())];
        }
        Self(chars)
    }
}

impl Default for SessionCode {
    /// Creates a new random join code (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0 {
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

impl FromStr for SessionCode {
    type Err = Error;

    /// Parses a join code, accepting lowercase input
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLength`] if the input is not exactly
    /// [`CODE_LENGTH`] characters, or [`Error::InvalidCharacter`] if any
    /// character falls outside the code alphabet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CODE_LENGTH {
            return Err(Error::InvalidLength);
        }

        let mut chars = [0u8; CODE_LENGTH];
        for (slot, c) in chars.iter_mut().zip(s.bytes()) {
            let normalized = c.to_ascii_uppercase();
            if !ALPHABET.contains(&normalized) {
                return Err(Error::InvalidCharacter);
            }
            *slot = normalized;
        }

        Ok(Self(chars))
    }
}
