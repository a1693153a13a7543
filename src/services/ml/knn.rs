use std::collections::HashMap;

use super::similarity::{cosine, SimilarityFn};
use super::top_k::TopK;
use crate::error::{AppError, AppResult};
use crate::models::UserChannelActivity;

pub const DEFAULT_NEIGHBORS: usize = 10;

#[derive(Clone, Copy)]
pub struct KnnParams {
    /// Number of neighbor channels a prediction is averaged over
    pub k: usize,
    pub similarity: SimilarityFn,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_NEIGHBORS,
            similarity: cosine,
        }
    }
}

impl std::fmt::Debug for KnnParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnnParams").field("k", &self.k).finish_non_exhaustive()
    }
}

impl KnnParams {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

/// Item-based nearest-neighbor model over channels
///
/// Channels are rows and users are columns of the activity matrix. Both are
/// indexed in sorted id order, so fitting the same activity twice yields
/// identical matrices. A fitted model is immutable and safe to share
/// between scoring workers.
#[derive(Debug, Clone)]
pub struct KnnModel {
    params: KnnParams,
    user_index: HashMap<String, usize>,
    channel_index: HashMap<String, usize>,
    activity: Vec<Vec<f64>>,
    similarity: Vec<Vec<f64>>,
}

impl KnnModel {
    pub fn fit(params: KnnParams, activity: &UserChannelActivity) -> Self {
        let mut users: Vec<&str> = activity.users().collect();
        users.sort_unstable();
        let channels: Vec<&str> = activity.channel_ids().into_iter().collect();

        let user_index: HashMap<String, usize> = users
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();
        let channel_index: HashMap<String, usize> = channels
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();

        let mut matrix = vec![vec![0.0; users.len()]; channels.len()];
        for (user_id, counts) in activity.iter() {
            let column = user_index[user_id];
            for (channel_id, count) in counts {
                let row = channel_index[channel_id.as_str()];
                matrix[row][column] = *count as f64;
            }
        }

        let similarity = similarity_matrix(&matrix, params.similarity);

        tracing::debug!(
            users = users.len(),
            channels = channels.len(),
            k = params.k,
            "Fitted channel similarity model"
        );

        Self {
            params,
            user_index,
            channel_index,
            activity: matrix,
            similarity,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_index.len()
    }

    pub fn user_count(&self) -> usize {
        self.user_index.len()
    }

    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let row = *self.channel_index.get(a)?;
        let column = *self.channel_index.get(b)?;
        Some(self.similarity[row][column])
    }

    /// The `k` rows most similar to `row`, excluding itself, most similar first
    fn neighbors(&self, row: usize) -> Vec<(usize, f64)> {
        let mut top = TopK::new(self.params.k);
        for (other, sim) in self.similarity[row].iter().enumerate() {
            if other != row {
                top.push(other, *sim);
            }
        }
        top.into_sorted_vec()
    }

    /// Predicted activity of `user_id` in `channel_id`
    ///
    /// Similarity-weighted average of the user's activity in the `k`
    /// nearest channels. Returns 0 when fewer than `k` channels were fitted
    /// or when every neighbor has zero similarity.
    pub fn predict(&self, user_id: &str, channel_id: &str) -> AppResult<f64> {
        let row = *self
            .channel_index
            .get(channel_id)
            .ok_or_else(|| AppError::unknown_channel(channel_id))?;
        let column = *self
            .user_index
            .get(user_id)
            .ok_or_else(|| AppError::unknown_user(user_id))?;

        if self.channel_count() < self.params.k {
            return Ok(0.0);
        }

        let mut weighted = 0.0;
        let mut total = 0.0;
        for (neighbor, sim) in self.neighbors(row) {
            weighted += sim * self.activity[neighbor][column];
            total += sim;
        }

        if total == 0.0 {
            return Ok(0.0);
        }
        Ok(weighted / total)
    }

    #[cfg(test)]
    fn with_similarity(params: KnnParams, similarity: Vec<Vec<f64>>) -> Self {
        Self {
            params,
            user_index: HashMap::new(),
            channel_index: HashMap::new(),
            activity: Vec::new(),
            similarity,
        }
    }
}

fn similarity_matrix(activity: &[Vec<f64>], similarity: SimilarityFn) -> Vec<Vec<f64>> {
    let n = activity.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sim = similarity(&activity[i], &activity[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}
