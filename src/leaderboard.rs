//! Leaderboard projection and scoring records
//!
//! This module contains two pieces: a pure, deterministic projection that
//! ranks the current roster for display, and the [`ScoreBook`] that records
//! points earned per question for end-of-quiz summaries. The projection has
//! no side effects and is safe to recompute on every roster or score
//! change; identical inputs always produce identical output.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::roster::{Id, Participant};

/// One ranked entry in the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// The player's ID
    pub id: Id,
    /// The player's username
    pub username: String,
    /// The player's total score
    pub score: u64,
    /// Position in the ranking (1-indexed)
    pub position: usize,
}

/// A ranked view of the session derived from the roster
///
/// Produced by [`project`]; carries the ranking plus the auxiliary metrics
/// shown on the host dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Players ranked best-first
    pub standings: Vec<Standing>,
    /// Fraction of players who have answered the current question, in [0, 1]
    pub participation_rate: f64,
    /// Mean score across all players; 0 for an empty roster
    pub average_score: f64,
}

/// Ranks players by score, breaking ties deterministically
///
/// Sort key: score descending, then earlier `join_time`, then ID. Ties must
/// never fall back to map iteration order, which would make positions
/// unstable across recomputations.
///
/// # Arguments
///
/// * `players` - The players to rank, in any order
/// * `answered_current` - How many players have answered the current question
///
/// # Returns
///
/// A [`Projection`] with 1-indexed positions and auxiliary metrics.
pub fn project<'a>(
    players: impl Iterator<Item = (Id, &'a Participant)>,
    answered_current: usize,
) -> Projection {
    let ranked = players
        .sorted_by(|(a_id, a), (b_id, b)| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.join_time.cmp(&b.join_time))
                .then_with(|| a_id.cmp(b_id))
        })
        .collect_vec();

    let total = ranked.len();
    let score_sum: u64 = ranked.iter().map(|(_, p)| p.score).sum();

    Projection {
        standings: ranked
            .into_iter()
            .enumerate()
            .map(|(index, (id, participant))| Standing {
                id,
                username: participant.username.clone(),
                score: participant.score,
                position: index + 1,
            })
            .collect_vec(),
        participation_rate: if total == 0 {
            0.0
        } else {
            answered_current as f64 / total as f64
        },
        average_score: if total == 0 {
            0.0
        } else {
            score_sum as f64 / total as f64
        },
    }
}

/// Score information for a single player
///
/// Sent to players so they can see their own performance without the
/// full leaderboard.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Total points earned by the player
    pub points: u64,
    /// Current position in the leaderboard (1-indexed)
    pub position: usize,
}

/// Summary of final session statistics and player performance
#[derive(Debug, Clone)]
pub struct FinalSummary {
    /// For each question, tuple of (players who scored, players who didn't)
    stats: Vec<(usize, usize)>,
    /// For each player, the points they earned on each question
    mapping: HashMap<Id, Vec<u64>>,
}

/// Serialization helper for ScoreBook struct
#[derive(Deserialize)]
struct ScoreBookSerde {
    points_by_question: Vec<Vec<(Id, u64)>>,
}

/// Records points earned per question across the session
///
/// Each closed question contributes one round of `(player, points)` pairs,
/// including zero entries for players who answered wrong or not at all.
/// The rounds feed the end-of-quiz summaries for the host and for each
/// player.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "ScoreBookSerde")]
pub struct ScoreBook {
    /// Points earned by each player for each question, in question order
    points_by_question: Vec<Vec<(Id, u64)>>,

    /// Final summary (computed once when needed)
    #[serde(skip)]
    final_summary: once_cell_serde::sync::OnceCell<FinalSummary>,
}

impl From<ScoreBookSerde> for ScoreBook {
    fn from(serde: ScoreBookSerde) -> Self {
        Self {
            points_by_question: serde.points_by_question,
            final_summary: once_cell_serde::sync::OnceCell::new(),
        }
    }
}

impl ScoreBook {
    /// Records the scores for one closed question
    ///
    /// # Arguments
    ///
    /// * `scores` - Slice of (player_id, points_earned) pairs for the round
    pub fn add_round(&mut self, scores: &[(Id, u64)]) {
        self.points_by_question.push(scores.to_vec());
    }

    /// Returns the number of recorded rounds
    pub fn rounds(&self) -> usize {
        self.points_by_question.len()
    }

    /// Computes the final summary from the recorded rounds
    fn compute_final_summary(&self) -> FinalSummary {
        FinalSummary {
            stats: self
                .points_by_question
                .iter()
                .map(|round| {
                    let earned_count = round.iter().filter(|(_, earned)| *earned > 0).count();

                    (earned_count, round.len() - earned_count)
                })
                .collect(),
            mapping: self
                .points_by_question
                .iter()
                .map(|round| round.iter().copied().collect::<HashMap<_, _>>())
                .enumerate()
                .fold(
                    HashMap::new(),
                    |mut aggregate, (question_index, round_mapping)| {
                        for (id, points) in round_mapping {
                            // A player's first round may be mid-quiz; pad the
                            // earlier questions before recording this one
                            let entry: &mut Vec<u64> = aggregate.entry(id).or_default();
                            entry.resize(question_index, 0);
                            entry.push(points);
                        }
                        for v in aggregate.values_mut() {
                            v.resize(question_index + 1, 0);
                        }
                        aggregate
                    },
                ),
        }
    }

    /// Gets or computes the final summary with caching
    fn final_summary(&self) -> &FinalSummary {
        self.final_summary.get_or_init(|| self.compute_final_summary())
    }

    /// Generates summary statistics for the session host
    ///
    /// # Returns
    ///
    /// A tuple of (total_player_count, per_question_stats) where each stat
    /// is (players_who_scored, players_who_didn't) for that question.
    pub fn host_summary(&self) -> (usize, Vec<(usize, usize)>) {
        let final_summary = self.final_summary();

        (final_summary.mapping.len(), final_summary.stats.clone())
    }

    /// Generates the per-question points breakdown for a specific player
    ///
    /// Questions the player did not participate in are filled with zeros.
    pub fn player_summary(&self, id: Id) -> Vec<u64> {
        self.final_summary()
            .mapping
            .get(&id)
            .map_or(vec![0; self.points_by_question.len()], std::clone::Clone::clone)
    }
}
