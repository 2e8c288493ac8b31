//! Participant roster management
//!
//! This module manages the identities and state of all participants in a
//! quiz session: the host and the players. The roster is a map keyed by
//! participant ID, so duplicate joins are structurally impossible, and it
//! provides functionality for sending messages, mutating scores, and
//! filtering participants by role.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;
use web_time::SystemTime;

use super::{
    coordinator::{SyncMessage, UpdateMessage},
    session::Tunnel,
};

/// A unique identifier for participants in a session
///
/// Each participant (host or player) gets a unique ID that persists
/// throughout their participation in the session, including across
/// reconnects.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    /// Creates a new random participant ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role of a connection within a session
///
/// The role is carried on the connection credential when a client joins;
/// there is no sentinel user ID for the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Role {
    /// The session host who controls the question flow
    Host,
    /// A player answering questions
    Player,
}

/// Per-player state tracked for the lifetime of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The player's validated username
    pub username: String,
    /// When the player joined; used as the deterministic leaderboard tie-break
    pub join_time: SystemTime,
    /// Total points earned so far; never decreases within a session
    pub score: u64,
    /// Number of questions this player has submitted an accepted answer for
    pub questions_answered: usize,
}

impl Participant {
    /// Creates a fresh participant record with a zero score
    pub fn new(username: String, join_time: SystemTime) -> Self {
        Self {
            username,
            join_time,
            score: 0,
            questions_answered: 0,
        }
    }
}

/// A roster entry: the host or a player with its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Member {
    /// The session host
    Host,
    /// A player with their per-session state
    Player(Participant),
}

impl Member {
    /// Returns the role of this member without the associated data
    pub fn role(&self) -> Role {
        match self {
            Member::Host => Role::Host,
            Member::Player(_) => Role::Player,
        }
    }
}

/// Serialization helper for Roster struct
#[derive(Deserialize)]
struct RosterSerde {
    mapping: HashMap<Id, Member>,
}

/// Manages all members of a quiz session
///
/// This struct tracks connected participants keyed by ID, maintains a
/// role-indexed reverse mapping for efficient filtering, and provides
/// broadcast helpers over the [`Tunnel`] abstraction.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "RosterSerde")]
pub struct Roster {
    /// Primary mapping from participant ID to their member record
    mapping: HashMap<Id, Member>,

    /// Reverse mapping organized by role for efficient filtering
    #[serde(skip_serializing)]
    reverse_mapping: EnumMap<Role, HashSet<Id>>,
}

impl From<RosterSerde> for Roster {
    /// Reconstructs the Roster from serialized data
    ///
    /// This rebuilds the reverse mapping from the primary mapping,
    /// which is necessary since the reverse mapping is not serialized.
    fn from(serde: RosterSerde) -> Self {
        let RosterSerde { mapping } = serde;
        let mut reverse_mapping: EnumMap<Role, HashSet<Id>> = EnumMap::default();
        for (id, member) in &mapping {
            reverse_mapping[member.role()].insert(*id);
        }
        Self {
            mapping,
            reverse_mapping,
        }
    }
}

/// Errors that can occur when managing the roster
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session has reached the maximum number of allowed participants
    #[error("maximum number of participants reached")]
    SessionFull,
}

impl Roster {
    /// Creates a new roster with the host already registered
    pub fn with_host(host_id: Id) -> Self {
        Self {
            mapping: {
                let mut map = HashMap::default();
                map.insert(host_id, Member::Host);
                map
            },
            reverse_mapping: {
                let mut map: EnumMap<Role, HashSet<Id>> = EnumMap::default();
                map[Role::Host].insert(host_id);
                map
            },
        }
    }

    /// Adds a member to the roster
    ///
    /// Adding an ID that is already present is a no-op, which makes joins
    /// idempotent: a rejoining participant never produces a duplicate
    /// roster entry.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the member was inserted, `Ok(false)` if the ID was
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionFull`] if inserting would exceed the
    /// participant cap.
    pub fn add_member(&mut self, id: Id, member: Member) -> Result<bool, Error> {
        if self.mapping.contains_key(&id) {
            return Ok(false);
        }

        if self.mapping.len() >= crate::constants::session::MAX_PARTICIPANTS {
            return Err(Error::SessionFull);
        }

        self.reverse_mapping[member.role()].insert(id);
        self.mapping.insert(id, member);

        Ok(true)
    }

    /// Removes a member from the roster
    ///
    /// # Returns
    ///
    /// The removed member record, or `None` if the ID was not present.
    pub fn remove_member(&mut self, id: &Id) -> Option<Member> {
        let member = self.mapping.remove(id)?;
        self.reverse_mapping[member.role()].remove(id);
        Some(member)
    }

    /// Returns the member record for an ID, if present
    pub fn get_member(&self, id: &Id) -> Option<&Member> {
        self.mapping.get(id)
    }

    /// Checks whether an ID is on the roster
    pub fn has_member(&self, id: &Id) -> bool {
        self.mapping.contains_key(id)
    }

    /// Returns the participant record for a player ID
    ///
    /// Returns `None` for the host or for IDs not on the roster.
    pub fn participant(&self, id: &Id) -> Option<&Participant> {
        match self.mapping.get(id) {
            Some(Member::Player(participant)) => Some(participant),
            _ => None,
        }
    }

    /// Returns the username of a player
    pub fn get_username(&self, id: &Id) -> Option<String> {
        self.participant(id).map(|p| p.username.clone())
    }

    /// Iterates over all players with their IDs
    pub fn players(&self) -> impl Iterator<Item = (Id, &Participant)> {
        self.mapping.iter().filter_map(|(id, member)| match member {
            Member::Player(participant) => Some((*id, participant)),
            Member::Host => None,
        })
    }

    /// Adds points to a player's score
    ///
    /// Scores only ever increase; the addition saturates rather than wraps.
    /// No-op for the host or unknown IDs.
    pub fn add_points(&mut self, id: &Id, points: u64) {
        if let Some(Member::Player(participant)) = self.mapping.get_mut(id) {
            participant.score = participant.score.saturating_add(points);
        }
    }

    /// Records that a player submitted an accepted answer
    ///
    /// No-op for the host or unknown IDs.
    pub fn record_answered(&mut self, id: &Id) {
        if let Some(Member::Player(participant)) = self.mapping.get_mut(id) {
            participant.questions_answered += 1;
        }
    }

    /// Gets the count of members with a specific role
    pub fn specific_count(&self, filter: Role) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Gets a vector of all members with their tunnels and records
    ///
    /// Members without an active tunnel are skipped.
    pub fn vec<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> Vec<(Id, T, Member)> {
        self.reverse_mapping
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(m)) => Some((*x, t, m.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Gets a vector of members of a specific role with their tunnels
    pub fn specific_vec<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: Role,
        tunnel_finder: F,
    ) -> Vec<(Id, T, Member)> {
        self.reverse_mapping[filter]
            .iter()
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(m)) => Some((*x, t, m.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Checks if a member has an active connection
    pub fn is_alive<T: Tunnel, F: Fn(Id) -> Option<T>>(id: Id, tunnel_finder: F) -> bool {
        tunnel_finder(id).is_some()
    }

    /// Closes the tunnel of a member, if one is active
    pub fn close_tunnel<T: Tunnel, F: Fn(Id) -> Option<T>>(id: &Id, tunnel_finder: F) {
        if let Some(tunnel) = tunnel_finder(*id) {
            tunnel.close();
        }
    }

    /// Sends an update message to a specific member
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(tunnel) = tunnel_finder(id) else {
            return;
        };

        tunnel.send_message(message);
    }

    /// Sends a state synchronization message to a specific member
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(tunnel) = tunnel_finder(id) else {
            return;
        };

        tunnel.send_state(message);
    }

    /// Sends personalized messages to all members using a sender function
    ///
    /// The sender function is called for each member and can return
    /// different messages based on the member's ID and role, or `None` to
    /// skip sending.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, Role) -> Option<UpdateMessage>,
    {
        for (id, tunnel, member) in self.vec(tunnel_finder) {
            let Some(message) = sender(id, member.role()) else {
                continue;
            };

            tunnel.send_message(&message);
        }
    }

    /// Broadcasts an update message to every member
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_, _| Some(message.to_owned()), tunnel_finder);
    }

    /// Sends an update message to all members of a specific role
    pub fn announce_specific<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: Role,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        for id in &self.reverse_mapping[filter] {
            self.send_message(message, *id, &tunnel_finder);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn player(name: &str) -> Member {
        Member::Player(Participant::new(name.to_string(), SystemTime::now()))
    }

    #[test]
    fn test_roster_with_host() {
        let host_id = Id::new();
        let roster = Roster::with_host(host_id);

        assert!(roster.has_member(&host_id));
        assert_eq!(roster.specific_count(Role::Host), 1);
        assert_eq!(roster.specific_count(Role::Player), 0);
        assert_eq!(roster.get_member(&host_id), Some(&Member::Host));
    }

    #[test]
    fn test_roster_add_and_remove_player() {
        let mut roster = Roster::with_host(Id::new());
        let id = Id::new();

        assert_eq!(roster.add_member(id, player("Alice")), Ok(true));
        assert_eq!(roster.specific_count(Role::Player), 1);
        assert_eq!(roster.get_username(&id), Some("Alice".to_string()));

        let removed = roster.remove_member(&id);
        assert!(matches!(removed, Some(Member::Player(_))));
        assert!(!roster.has_member(&id));
        assert_eq!(roster.specific_count(Role::Player), 0);
    }

    #[test]
    fn test_roster_duplicate_join_is_noop() {
        let mut roster = Roster::with_host(Id::new());
        let id = Id::new();

        assert_eq!(roster.add_member(id, player("Alice")), Ok(true));
        assert_eq!(roster.add_member(id, player("Imposter")), Ok(false));

        assert_eq!(roster.specific_count(Role::Player), 1);
        // Original record untouched
        assert_eq!(roster.get_username(&id), Some("Alice".to_string()));
    }

    #[test]
    fn test_roster_session_full() {
        let mut roster = Roster::with_host(Id::new());
        for i in 0..crate::constants::session::MAX_PARTICIPANTS - 1 {
            roster.add_member(Id::new(), player(&format!("p{i}"))).unwrap();
        }

        assert_eq!(
            roster.add_member(Id::new(), player("overflow")),
            Err(Error::SessionFull)
        );

        // Re-adding an existing member still succeeds at the cap
        let (existing, _) = roster.players().next().unwrap();
        assert_eq!(roster.add_member(existing, player("rejoin")), Ok(false));
    }

    #[test]
    fn test_roster_score_is_monotonic() {
        let mut roster = Roster::with_host(Id::new());
        let id = Id::new();
        roster.add_member(id, player("Alice")).unwrap();

        roster.add_points(&id, 100);
        assert_eq!(roster.participant(&id).unwrap().score, 100);

        roster.add_points(&id, 0);
        assert_eq!(roster.participant(&id).unwrap().score, 100);

        roster.add_points(&id, u64::MAX);
        assert_eq!(roster.participant(&id).unwrap().score, u64::MAX);
    }

    #[test]
    fn test_roster_add_points_to_host_is_noop() {
        let host_id = Id::new();
        let mut roster = Roster::with_host(host_id);

        roster.add_points(&host_id, 100);
        roster.record_answered(&host_id);
        assert_eq!(roster.participant(&host_id), None);
    }

    #[test]
    fn test_roster_record_answered() {
        let mut roster = Roster::with_host(Id::new());
        let id = Id::new();
        roster.add_member(id, player("Alice")).unwrap();

        roster.record_answered(&id);
        roster.record_answered(&id);
        assert_eq!(roster.participant(&id).unwrap().questions_answered, 2);
    }

    #[test]
    fn test_roster_players_iterator_excludes_host() {
        let mut roster = Roster::with_host(Id::new());
        roster.add_member(Id::new(), player("Alice")).unwrap();
        roster.add_member(Id::new(), player("Bob")).unwrap();

        assert_eq!(roster.players().count(), 2);
    }

    #[test]
    fn test_roster_serialization_rebuilds_reverse_mapping() {
        let host_id = Id::new();
        let mut roster = Roster::with_host(host_id);
        let id = Id::new();
        roster.add_member(id, player("Alice")).unwrap();

        let serialized = serde_json::to_string(&roster).unwrap();
        let restored: Roster = serde_json::from_str(&serialized).unwrap();

        assert_eq!(restored.specific_count(Role::Host), 1);
        assert_eq!(restored.specific_count(Role::Player), 1);
        assert_eq!(restored.get_username(&id), Some("Alice".to_string()));
    }
}
