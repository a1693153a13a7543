use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

use super::KvStore;
use crate::error::{AppError, AppResult};
use crate::models::{ChannelCounts, ChannelScore, Cursor, Scope, UserChannelActivity};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Cursor,
    ActivityUsers,
    UserActivity { generation: u64, user_id: String },
    Recommendations { user_id: String, scope: Scope },
    JobLastRun(String),
    JobLock(String),
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKey::Cursor => write!(f, "cursor"),
            StoreKey::ActivityUsers => write!(f, "activity:users"),
            StoreKey::UserActivity {
                generation,
                user_id,
            } => write!(f, "activity:user:{}:{}", generation, user_id),
            StoreKey::Recommendations { user_id, scope } => {
                write!(f, "recs:{}:{}", user_id, scope)
            }
            StoreKey::JobLastRun(name) => write!(f, "job:last_run:{}", name),
            StoreKey::JobLock(name) => write!(f, "job:lock:{}", name),
        }
    }
}

/// Committed baseline: the generation its user keys live under and the
/// users written in it
///
/// Stored under [`StoreKey::ActivityUsers`]. Writing it is the single step
/// that makes a new baseline visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct BaselineManifest {
    generation: u64,
    users: Vec<String>,
}

/// Typed persistence for the cursor, the activity baseline and the
/// recommendation lists, JSON encoded over any [`KvStore`]
#[derive(Clone)]
pub struct SuggestStore {
    kv: Arc<dyn KvStore>,
}

impl SuggestStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &'static str {
        self.kv.backend()
    }

    async fn read<T: DeserializeOwned>(&self, key: &StoreKey) -> AppResult<Option<T>> {
        let key = key.to_string();
        match self.kv.get(&key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::Persistence(format!("Corrupt value under {}: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &StoreKey, value: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| AppError::Persistence(format!("Serialization error: {}", e)))?;
        self.kv.set(&key.to_string(), &bytes).await
    }

    async fn remove(&self, key: &StoreKey) -> AppResult<()> {
        self.kv.delete(&key.to_string()).await
    }

    /// Absent cursor means nothing has been aggregated yet
    pub async fn cursor(&self) -> AppResult<Cursor> {
        Ok(self
            .read::<Cursor>(&StoreKey::Cursor)
            .await?
            .unwrap_or(Cursor::Beginning))
    }

    pub async fn set_cursor(&self, cursor: Cursor) -> AppResult<()> {
        self.write(&StoreKey::Cursor, &cursor).await
    }

    async fn manifest(&self) -> AppResult<Option<BaselineManifest>> {
        self.read(&StoreKey::ActivityUsers).await
    }

    /// Loads the baseline of the last committed generation
    pub async fn load_activity(&self) -> AppResult<UserChannelActivity> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(UserChannelActivity::new());
        };

        let mut activity = UserChannelActivity::new();
        for user_id in manifest.users {
            let key = StoreKey::UserActivity {
                generation: manifest.generation,
                user_id: user_id.clone(),
            };
            match self.read::<ChannelCounts>(&key).await? {
                Some(counts) => activity.insert_user(user_id, counts),
                None => tracing::warn!(
                    user_id = %user_id,
                    generation = manifest.generation,
                    "Listed user has no stored activity"
                ),
            }
        }
        Ok(activity)
    }

    /// Replaces the baseline as a whole
    ///
    /// User counts go under the next generation and only the manifest write
    /// commits them. A failure before that leaves the previous baseline in
    /// effect; the half-written generation is overwritten by the next save.
    pub async fn save_activity(&self, activity: &UserChannelActivity) -> AppResult<()> {
        let previous = self.manifest().await?;
        let generation = previous.as_ref().map_or(1, |m| m.generation + 1);

        let mut users = Vec::with_capacity(activity.user_count());
        for (user_id, counts) in activity.iter() {
            let key = StoreKey::UserActivity {
                generation,
                user_id: user_id.to_string(),
            };
            self.write(&key, counts).await?;
            users.push(user_id.to_string());
        }
        users.sort();

        self.write(&StoreKey::ActivityUsers, &BaselineManifest { generation, users })
            .await?;

        if let Some(previous) = previous {
            self.remove_generation(&previous).await;
        }
        Ok(())
    }

    /// Best effort; stale keys of an old generation are never read
    async fn remove_generation(&self, manifest: &BaselineManifest) {
        for user_id in &manifest.users {
            let key = StoreKey::UserActivity {
                generation: manifest.generation,
                user_id: user_id.clone(),
            };
            if let Err(e) = self.remove(&key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove stale activity key");
            }
        }
    }

    pub async fn clear_activity(&self) -> AppResult<()> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(());
        };

        // Drop the manifest first so a load never sees half-deleted users.
        self.remove(&StoreKey::ActivityUsers).await?;
        for user_id in manifest.users {
            self.remove(&StoreKey::UserActivity {
                generation: manifest.generation,
                user_id,
            })
            .await?;
        }
        Ok(())
    }

    pub async fn recommendations(
        &self,
        user_id: &str,
        scope: &Scope,
    ) -> AppResult<Vec<ChannelScore>> {
        let key = StoreKey::Recommendations {
            user_id: user_id.to_string(),
            scope: scope.clone(),
        };
        Ok(self.read(&key).await?.unwrap_or_default())
    }

    pub async fn save_recommendations(
        &self,
        user_id: &str,
        scope: &Scope,
        list: &[ChannelScore],
    ) -> AppResult<()> {
        let key = StoreKey::Recommendations {
            user_id: user_id.to_string(),
            scope: scope.clone(),
        };
        self.write(&key, list).await
    }

    pub async fn clear_recommendations(&self, user_id: &str, scope: &Scope) -> AppResult<()> {
        self.remove(&StoreKey::Recommendations {
            user_id: user_id.to_string(),
            scope: scope.clone(),
        })
        .await
    }

    pub async fn last_run(&self, job: &str) -> AppResult<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.read(&StoreKey::JobLastRun(job.to_string())).await?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    pub async fn set_last_run(&self, job: &str, at: DateTime<Utc>) -> AppResult<()> {
        self.write(&StoreKey::JobLastRun(job.to_string()), &at.timestamp_millis())
            .await
    }
}
