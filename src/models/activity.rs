use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{AppError, AppResult};
use crate::models::Post;

/// Post counts of one user, keyed by channel id
pub type ChannelCounts = HashMap<String, u64>;

/// Sparse user → channel → post count map
///
/// Absent pairs count as zero. The map only ever grows through [`union`],
/// so counts stay non-negative by construction.
///
/// [`union`]: UserChannelActivity::union
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserChannelActivity(HashMap<String, ChannelCounts>);

impl UserChannelActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts the posts that represent user activity, all attributed to `channel_id`
    pub fn from_posts(channel_id: &str, posts: &[Post]) -> Self {
        let mut activity = Self::new();
        for post in posts.iter().filter(|p| p.counts_as_activity()) {
            *activity
                .0
                .entry(post.user_id.clone())
                .or_default()
                .entry(channel_id.to_string())
                .or_insert(0) += 1;
        }
        activity
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of users with at least one entry
    pub fn user_count(&self) -> usize {
        self.0.len()
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Distinct channel ids across all users, in sorted order
    pub fn channel_ids(&self) -> BTreeSet<&str> {
        self.0
            .values()
            .flat_map(|counts| counts.keys().map(String::as_str))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChannelCounts)> {
        self.0.iter().map(|(user, counts)| (user.as_str(), counts))
    }

    pub fn channels_for(&self, user_id: &str) -> Option<&ChannelCounts> {
        self.0.get(user_id)
    }

    pub fn count(&self, user_id: &str, channel_id: &str) -> u64 {
        self.0
            .get(user_id)
            .and_then(|counts| counts.get(channel_id))
            .copied()
            .unwrap_or(0)
    }

    /// True when the user has an entry for the channel, even a zero one
    pub fn has_visited(&self, user_id: &str, channel_id: &str) -> bool {
        self.0
            .get(user_id)
            .is_some_and(|counts| counts.contains_key(channel_id))
    }

    /// Replaces one user's counts; used when loading a persisted baseline
    pub fn insert_user(&mut self, user_id: String, counts: ChannelCounts) {
        self.0.insert(user_id, counts);
    }

    /// Adds `count` to the (user, channel) pair
    pub fn add(&mut self, user_id: &str, channel_id: &str, count: u64) -> AppResult<()> {
        let slot = self
            .0
            .entry(user_id.to_string())
            .or_default()
            .entry(channel_id.to_string())
            .or_insert(0);

        *slot = slot
            .checked_add(count)
            .ok_or_else(|| AppError::MergeInconsistency {
                user_id: user_id.to_string(),
                channel_id: channel_id.to_string(),
            })?;
        Ok(())
    }

    /// Merges `other` into `self` by summing counts pair by pair
    ///
    /// Associative and commutative, so batching of partial merges never
    /// changes the total.
    pub fn union(&mut self, other: &UserChannelActivity) -> AppResult<()> {
        for (user_id, counts) in &other.0 {
            if counts.is_empty() {
                self.0.entry(user_id.clone()).or_default();
            }
            for (channel_id, count) in counts {
                self.add(user_id, channel_id, *count)?;
            }
        }
        Ok(())
    }

    /// Keeps only the listed users and channels
    pub fn restricted_to(&self, users: &HashSet<String>, channels: &HashSet<String>) -> Self {
        let inner = self
            .0
            .iter()
            .filter(|(user_id, _)| users.contains(*user_id))
            .filter_map(|(user_id, counts)| {
                let kept: ChannelCounts = counts
                    .iter()
                    .filter(|(channel_id, _)| channels.contains(*channel_id))
                    .map(|(channel_id, count)| (channel_id.clone(), *count))
                    .collect();
                (!kept.is_empty()).then(|| (user_id.clone(), kept))
            })
            .collect();
        Self(inner)
    }
}

impl From<HashMap<String, ChannelCounts>> for UserChannelActivity {
    fn from(inner: HashMap<String, ChannelCounts>) -> Self {
        Self(inner)
    }
}
