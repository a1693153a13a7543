use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::config::{Config, ScopeMode};
use crate::db::SuggestStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    Channel, ChannelScore, Cursor, PassState, PassSummary, ResetMode, Scope, UserChannelActivity,
};
use crate::services::activity::ActivityAggregator;
use crate::services::cancel::Cancellation;
use crate::services::directory::Directory;
use crate::services::ml::{KnnModel, KnnParams};
use crate::services::platform::{lookup_channels, ChatPlatform};

/// Tuning of a recommendation pass
#[derive(Debug, Clone)]
pub struct RecommenderSettings {
    pub neighbors: usize,
    /// Shrink `neighbors` for small channel sets
    pub adaptive_neighbors: bool,
    pub recommendation_count: usize,
    pub scope: ScopeMode,
    pub scoring_workers: usize,
    pub page_size: u32,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            neighbors: crate::services::ml::DEFAULT_NEIGHBORS,
            adaptive_neighbors: true,
            recommendation_count: 5,
            scope: ScopeMode::Team,
            scoring_workers: 4,
            page_size: 100,
        }
    }
}

impl From<&Config> for RecommenderSettings {
    fn from(config: &Config) -> Self {
        Self {
            neighbors: config.neighbors,
            adaptive_neighbors: config.adaptive_neighbors,
            recommendation_count: config.recommendation_count,
            scope: config.recommendation_scope,
            scoring_workers: config.scoring_workers,
            page_size: config.page_size,
        }
    }
}

impl RecommenderSettings {
    /// Neighbor count for a model over `channel_count` candidate channels
    pub fn neighbors_for(&self, channel_count: usize) -> usize {
        if self.adaptive_neighbors {
            self.neighbors.min(channel_count / 2 + 1)
        } else {
            self.neighbors
        }
    }
}

/// One fitted model and the users scored against it
struct ScoringUnit {
    scope: Scope,
    model: KnnModel,
    activity: UserChannelActivity,
    /// (user id, candidate channel ids)
    users: Vec<(String, Vec<String>)>,
}

/// Puts the observable state back to idle however the pass ends
struct IdleOnExit<'a>(&'a watch::Sender<PassState>);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.0.send_replace(PassState::Idle);
    }
}

/// Recommendation pass orchestration and the read/reset operations on its
/// results
///
/// At most one pass runs at a time in this process. Every user is scored
/// before the first list is written, so a pass that fails before
/// persisting leaves the previous lists in place.
pub struct RecommendationService {
    platform: Arc<dyn ChatPlatform>,
    store: SuggestStore,
    aggregator: ActivityAggregator,
    settings: RecommenderSettings,
    pass_lock: Arc<Mutex<()>>,
    state: watch::Sender<PassState>,
    shutdown: Cancellation,
}

impl RecommendationService {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: SuggestStore,
        settings: RecommenderSettings,
    ) -> Self {
        let aggregator =
            ActivityAggregator::new(Arc::clone(&platform), store.clone(), settings.page_size);
        let (state, _) = watch::channel(PassState::Idle);

        Self {
            platform,
            store,
            aggregator,
            settings,
            pass_lock: Arc::new(Mutex::new(())),
            state,
            shutdown: Cancellation::new(),
        }
    }

    pub fn settings(&self) -> &RecommenderSettings {
        &self.settings
    }

    /// Token cancelled on shutdown; manual passes run under it
    pub fn shutdown_token(&self) -> Cancellation {
        self.shutdown.clone()
    }

    pub fn status(&self) -> PassState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PassState> {
        self.state.subscribe()
    }

    /// Scope a list is stored under for a request made from `team_id`
    pub fn scope_for(&self, team_id: Option<&str>) -> AppResult<Scope> {
        match (self.settings.scope, team_id) {
            (ScopeMode::Global, _) => Ok(Scope::Global),
            (ScopeMode::Team, Some(team_id)) if !team_id.is_empty() => {
                Ok(Scope::Team(team_id.to_string()))
            }
            (ScopeMode::Team, _) => Err(AppError::InvalidInput(
                "team_id is required when recommendations are scoped per team".to_string(),
            )),
        }
    }

    /// Recomputes and persists the recommendation list of every user
    ///
    /// Fails with [`AppError::ComputeInProgress`] when another pass holds
    /// the lock.
    pub async fn pre_calculate_recommendations(
        &self,
        cancel: &Cancellation,
    ) -> AppResult<PassSummary> {
        let _pass = self
            .pass_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::ComputeInProgress)?;
        self.run_pass(cancel).await
    }

    /// Runs a pass now and waits at most `timeout` for it
    ///
    /// On timeout the pass keeps running in the background and the caller
    /// gets [`AppError::ComputeTimedOut`].
    pub async fn compute_now(self: &Arc<Self>, timeout: Duration) -> AppResult<PassSummary> {
        let pass = self
            .pass_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::ComputeInProgress)?;

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _pass = pass;
            let cancel = service.shutdown_token();
            service.run_pass(&cancel).await
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AppError::Internal(format!(
                "Recommendation pass task failed: {}",
                e
            ))),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Manual recompute still running in background"
                );
                Err(AppError::ComputeTimedOut(timeout.as_secs()))
            }
        }
    }

    async fn run_pass(&self, cancel: &Cancellation) -> AppResult<PassSummary> {
        let started = Instant::now();
        let _idle = IdleOnExit(&self.state);

        let result = self.run_phases(cancel).await;
        match &result {
            Ok(summary) => tracing::info!(
                scopes = summary.scopes,
                users = summary.users,
                recommendations = summary.recommendations,
                duration_ms = summary.duration_ms,
                "Recommendation pass finished"
            ),
            Err(e) => tracing::error!(
                error = %e,
                state = %self.status(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Recommendation pass aborted"
            ),
        }
        result
    }

    async fn run_phases(&self, cancel: &Cancellation) -> AppResult<PassSummary> {
        let started = Instant::now();

        self.enter(PassState::ComputingActivity);
        let directory =
            Directory::load(self.platform.as_ref(), self.settings.page_size, cancel).await?;
        let activity = self
            .aggregator
            .compute_activity(&directory.channel_ids(), cancel)
            .await?;

        self.enter(PassState::FittingModel);
        let settings = self.settings.clone();
        let units = tokio::task::spawn_blocking(move || build_units(&settings, &directory, &activity))
            .await
            .map_err(|e| AppError::Internal(format!("Model fitting task failed: {}", e)))?;
        cancel.check()?;

        self.enter(PassState::ScoringCandidates);
        let mut scored = Vec::with_capacity(units.len());
        for unit in units {
            cancel.check()?;
            let scope = unit.scope.clone();
            let lists = score_unit(
                Arc::new(unit),
                self.settings.scoring_workers,
                self.settings.recommendation_count,
                cancel,
            )
            .await?;
            scored.push((scope, lists));
        }
        cancel.check()?;

        self.enter(PassState::Persisting);
        let mut summary = PassSummary {
            scopes: scored.len(),
            ..PassSummary::default()
        };
        let total: usize = scored.iter().map(|(_, lists)| lists.len()).sum();
        for (scope, lists) in &scored {
            for (user_id, list) in lists {
                if let Err(e) = self.store.save_recommendations(user_id, scope, list).await {
                    tracing::error!(
                        error = %e,
                        user_id = %user_id,
                        scope = %scope,
                        saved = summary.users,
                        total,
                        "Failed to persist recommendations, pass aborted part way"
                    );
                    return Err(e);
                }
                summary.users += 1;
                summary.recommendations += list.len();
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    fn enter(&self, state: PassState) {
        tracing::info!(state = %state, "Recommendation pass phase");
        self.state.send_replace(state);
    }

    /// The stored list resolved to live channels, best first
    ///
    /// Channels that can no longer be looked up or were archived since the
    /// last pass are left out.
    pub async fn get_recommendations(&self, user_id: &str, scope: &Scope) -> AppResult<Vec<Channel>> {
        let mut stored = self.store.recommendations(user_id, scope).await?;
        stored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        stored.truncate(self.settings.recommendation_count);

        let ids = stored.into_iter().map(|s| s.channel_id).collect();
        let channels = lookup_channels(self.platform.as_ref(), ids)
            .await
            .into_iter()
            .filter(|c| {
                if c.is_archived() {
                    tracing::debug!(channel_id = %c.id, "Skipping archived recommended channel");
                }
                !c.is_archived()
            })
            .collect();
        Ok(channels)
    }

    /// Clears the user's list; a global reset also drops the activity
    /// baseline and rewinds the cursor
    ///
    /// A global reset fails with [`AppError::ComputeInProgress`] while a
    /// pass runs, since that pass would write its cursor and baseline over
    /// the reset.
    pub async fn reset(&self, user_id: &str, scope: &Scope, mode: ResetMode) -> AppResult<()> {
        let _pass = match mode {
            ResetMode::Global => Some(
                self.pass_lock
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| AppError::ComputeInProgress)?,
            ),
            ResetMode::User => None,
        };

        self.store.clear_recommendations(user_id, scope).await?;

        if mode == ResetMode::Global {
            self.store.clear_activity().await?;
            self.store.set_cursor(Cursor::Beginning).await?;
        }

        tracing::info!(user_id = %user_id, scope = %scope, ?mode, "Recommendations reset");
        Ok(())
    }
}

fn build_units(
    settings: &RecommenderSettings,
    directory: &Directory,
    activity: &UserChannelActivity,
) -> Vec<ScoringUnit> {
    match settings.scope {
        ScopeMode::Team => directory
            .teams()
            .iter()
            .map(|team| {
                let scope = Scope::Team(team.id.clone());
                let members = directory.team_members(&team.id);
                let channels = directory.team_channel_ids(&team.id);
                let mut users: Vec<String> = members.iter().cloned().collect();
                users.sort();
                build_unit(settings, directory, scope, activity, &members, &channels, users)
            })
            .collect(),
        ScopeMode::Global => {
            let members: HashSet<String> = directory.all_members().into_iter().collect();
            let channels: HashSet<String> = directory.channel_ids().into_iter().collect();
            let users: Vec<String> = directory.all_members().into_iter().collect();
            vec![build_unit(
                settings,
                directory,
                Scope::Global,
                activity,
                &members,
                &channels,
                users,
            )]
        }
    }
}

fn build_unit(
    settings: &RecommenderSettings,
    directory: &Directory,
    scope: Scope,
    activity: &UserChannelActivity,
    members: &HashSet<String>,
    channels: &HashSet<String>,
    users: Vec<String>,
) -> ScoringUnit {
    let scoped = activity.restricted_to(members, channels);
    let k = settings.neighbors_for(channels.len());
    let model = KnnModel::fit(KnnParams::with_k(k), &scoped);

    tracing::debug!(
        scope = %scope,
        users = users.len(),
        channels = channels.len(),
        fitted_channels = model.channel_count(),
        k,
        "Fitted scope model"
    );

    let users = users
        .into_iter()
        .map(|user_id| {
            let candidates = directory.candidate_channels(&scope, &user_id);
            (user_id, candidates)
        })
        .collect();

    ScoringUnit {
        scope,
        model,
        activity: scoped,
        users,
    }
}

/// Scores every user of the unit on blocking workers, one contiguous chunk
/// of users per worker
async fn score_unit(
    unit: Arc<ScoringUnit>,
    workers: usize,
    count: usize,
    cancel: &Cancellation,
) -> AppResult<Vec<(String, Vec<ChannelScore>)>> {
    let total = unit.users.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let chunk_size = total.div_ceil(workers.max(1));

    let mut join_set = JoinSet::new();
    for (chunk, start) in (0..total).step_by(chunk_size).enumerate() {
        let unit = Arc::clone(&unit);
        let cancel = cancel.clone();
        let end = (start + chunk_size).min(total);

        join_set.spawn_blocking(move || {
            let mut lists = Vec::with_capacity(end - start);
            for (user_id, candidates) in &unit.users[start..end] {
                cancel.check()?;
                let list = rank_candidates(&unit.model, &unit.activity, user_id, candidates, count);
                lists.push((user_id.clone(), list));
            }
            Ok::<_, AppError>((chunk, lists))
        });
    }

    let mut chunks = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let chunk = joined
            .map_err(|e| AppError::Internal(format!("Scoring task failed: {}", e)))??;
        chunks.push(chunk);
    }
    chunks.sort_by_key(|(chunk, _)| *chunk);

    Ok(chunks.into_iter().flat_map(|(_, lists)| lists).collect())
}

/// Top `count` unvisited candidates by predicted activity
///
/// Zero scores are dropped and ties are ordered by channel id.
pub fn rank_candidates(
    model: &KnnModel,
    activity: &UserChannelActivity,
    user_id: &str,
    candidates: &[String],
    count: usize,
) -> Vec<ChannelScore> {
    let mut scored = Vec::new();

    for channel_id in candidates {
        if activity.has_visited(user_id, channel_id) {
            continue;
        }
        match model.predict(user_id, channel_id) {
            Ok(score) if score > 0.0 && score.is_finite() => scored.push(ChannelScore {
                channel_id: channel_id.clone(),
                score,
            }),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(user_id = %user_id, channel_id = %channel_id, error = %e, "Skipping candidate");
            }
        }
    }

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.channel_id.cmp(&b.channel_id))
    });
    scored.truncate(count);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(entries: &[(&str, &str, u64)]) -> UserChannelActivity {
        let mut result = UserChannelActivity::new();
        for (user, channel, count) in entries {
            result.add(user, channel, *count).unwrap();
        }
        result
    }

    fn ids(list: &[ChannelScore]) -> Vec<&str> {
        list.iter().map(|s| s.channel_id.as_str()).collect()
    }

    #[test]
    fn test_neighbors_for() {
        let adaptive = RecommenderSettings::default();
        assert_eq!(adaptive.neighbors_for(4), 3);
        assert_eq!(adaptive.neighbors_for(0), 1);
        assert_eq!(adaptive.neighbors_for(100), 10);

        let fixed = RecommenderSettings {
            adaptive_neighbors: false,
            ..RecommenderSettings::default()
        };
        assert_eq!(fixed.neighbors_for(4), 10);
    }

    #[test]
    fn test_rank_candidates_skips_visited_and_unknown() {
        let activity = activity(&[
            ("user1", "chan1", 1),
            ("user1", "chan2", 2),
            ("user1", "chan3", 3),
            ("user2", "chan2", 4),
            ("user2", "chan3", 2),
            ("user2", "chan4", 1),
            ("user3", "chan1", 3),
            ("user3", "chan3", 2),
            ("user3", "chan4", 5),
        ]);
        let model = KnnModel::fit(KnnParams::with_k(2), &activity);
        let candidates: Vec<String> = ["chan1", "chan2", "chan3", "chan4", "chan9"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let list = rank_candidates(&model, &activity, "user1", &candidates, 5);
        assert_eq!(ids(&list), vec!["chan4"]);
        assert!((list[0].score - 1.76051).abs() < 0.001);

        let unknown_user = rank_candidates(&model, &activity, "ghost", &candidates, 5);
        assert!(unknown_user.is_empty());
    }

    #[test]
    fn test_rank_candidates_orders_and_truncates() {
        // a and b have identical activity, so their scores tie
        let activity = activity(&[
            ("u1", "a", 1),
            ("u1", "b", 1),
            ("u1", "x", 2),
            ("u2", "c", 1),
            ("u2", "x", 1),
            ("u3", "x", 1),
        ]);
        let model = KnnModel::fit(KnnParams::with_k(2), &activity);
        let candidates: Vec<String> = ["b", "x", "c", "a"].iter().map(|s| s.to_string()).collect();

        let list = rank_candidates(&model, &activity, "u3", &candidates, 5);
        assert_eq!(ids(&list), vec!["c", "a", "b"]);
        assert_eq!(list[1].score, list[2].score);

        let truncated = rank_candidates(&model, &activity, "u3", &candidates, 1);
        assert_eq!(truncated, list[..1].to_vec());
    }

    #[tokio::test]
    async fn test_score_unit_preserves_user_order() {
        let activity = activity(&[("u1", "a", 1), ("u2", "b", 1)]);
        let model = KnnModel::fit(KnnParams::with_k(1), &activity);
        let users: Vec<(String, Vec<String>)> = (0..7)
            .map(|i| (format!("user{}", i), vec!["a".to_string()]))
            .collect();
        let unit = ScoringUnit {
            scope: Scope::Global,
            model,
            activity,
            users,
        };

        let lists = score_unit(Arc::new(unit), 3, 5, &Cancellation::new())
            .await
            .unwrap();

        let order: Vec<_> = lists.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            order,
            vec!["user0", "user1", "user2", "user3", "user4", "user5", "user6"]
        );
    }

    #[tokio::test]
    async fn test_global_reset_waits_for_running_pass() {
        let store = SuggestStore::new(Arc::new(crate::db::MemoryKvStore::new()));
        let service = RecommendationService::new(
            Arc::new(crate::services::platform::MockChatPlatform::new()),
            store.clone(),
            RecommenderSettings::default(),
        );
        let team = Scope::Team("t1".to_string());
        let baseline = activity(&[("u1", "c1", 2)]);
        store.save_activity(&baseline).await.unwrap();
        store.set_cursor(Cursor::At(500)).await.unwrap();
        store
            .save_recommendations("u1", &team, &[ChannelScore {
                channel_id: "c2".to_string(),
                score: 1.0,
            }])
            .await
            .unwrap();

        let running = service.pass_lock.clone().try_lock_owned().unwrap();
        let err = service
            .reset("u1", &team, ResetMode::Global)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ComputeInProgress));
        assert_eq!(store.load_activity().await.unwrap(), baseline);
        assert_eq!(store.cursor().await.unwrap(), Cursor::At(500));

        // A per-user reset only touches the caller's list
        service.reset("u1", &team, ResetMode::User).await.unwrap();
        assert!(store.recommendations("u1", &team).await.unwrap().is_empty());

        drop(running);
        service.reset("u1", &team, ResetMode::Global).await.unwrap();
        assert!(store.load_activity().await.unwrap().is_empty());
        assert_eq!(store.cursor().await.unwrap(), Cursor::Beginning);
    }

    #[tokio::test]
    async fn test_score_unit_honors_cancellation() {
        let activity = activity(&[("u1", "a", 1)]);
        let unit = ScoringUnit {
            scope: Scope::Global,
            model: KnnModel::fit(KnnParams::with_k(1), &activity),
            activity,
            users: vec![("u1".to_string(), vec!["a".to_string()])],
        };
        let cancel = Cancellation::new();
        cancel.cancel();

        let err = score_unit(Arc::new(unit), 2, 5, &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
