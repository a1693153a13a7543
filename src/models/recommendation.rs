use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// One recommended channel and its predicted affinity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelScore {
    pub channel_id: String,
    pub score: f64,
}

/// Key space a recommendation list belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Team(String),
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Team(team_id) => write!(f, "team:{}", team_id),
        }
    }
}

/// Watermark of already aggregated activity
///
/// Stored as Unix milliseconds, with `-1` meaning nothing has been
/// aggregated yet and the whole history must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Cursor {
    Beginning,
    At(i64),
}

impl From<i64> for Cursor {
    fn from(millis: i64) -> Self {
        if millis < 0 {
            Cursor::Beginning
        } else {
            Cursor::At(millis)
        }
    }
}

impl From<Cursor> for i64 {
    fn from(cursor: Cursor) -> Self {
        match cursor {
            Cursor::Beginning => -1,
            Cursor::At(millis) => millis,
        }
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Beginning => write!(f, "beginning"),
            Cursor::At(millis) => write!(f, "{}", millis),
        }
    }
}

/// Phase of the recompute pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    ComputingActivity,
    FittingModel,
    ScoringCandidates,
    Persisting,
}

impl Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PassState::Idle => "idle",
            PassState::ComputingActivity => "computing_activity",
            PassState::FittingModel => "fitting_model",
            PassState::ScoringCandidates => "scoring_candidates",
            PassState::Persisting => "persisting",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one successful recompute pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Number of fitted models (teams, or 1 for the global scope)
    pub scopes: usize,
    /// Users whose list was replaced
    pub users: usize,
    /// Total entries across all persisted lists
    pub recommendations: usize,
    pub duration_ms: u64,
}

/// What a reset clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Only the caller's recommendation list
    User,
    /// The caller's list, the activity baseline and the cursor
    Global,
}
