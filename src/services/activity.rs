use chrono::Utc;
use std::sync::Arc;

use crate::db::SuggestStore;
use crate::error::{AppError, AppResult};
use crate::models::{Cursor, Post, UserChannelActivity};
use crate::services::cancel::Cancellation;
use crate::services::platform::{all_posts, ChatPlatform};

/// Incremental user/channel activity aggregation
///
/// Each run reads only posts newer than the persisted cursor and folds them
/// into the persisted baseline, so the baseline always covers history up to
/// the cursor.
pub struct ActivityAggregator {
    platform: Arc<dyn ChatPlatform>,
    store: SuggestStore,
    page_size: u32,
}

impl ActivityAggregator {
    pub fn new(platform: Arc<dyn ChatPlatform>, store: SuggestStore, page_size: u32) -> Self {
        Self {
            platform,
            store,
            page_size,
        }
    }

    /// Returns the full activity (baseline plus everything new) and
    /// advances the cursor
    ///
    /// Nothing is persisted unless every channel was fetched. The baseline
    /// commits all-or-nothing, so if its write fails after the cursor moved
    /// the previous cursor is written back and the next run folds the same
    /// window into the same baseline again.
    pub async fn compute_activity(
        &self,
        channel_ids: &[String],
        cancel: &Cancellation,
    ) -> AppResult<UserChannelActivity> {
        let previous = self.store.cursor().await?;
        let now = Utc::now().timestamp_millis();

        tracing::info!(
            cursor = %previous,
            channels = channel_ids.len(),
            "Aggregating channel activity"
        );

        let mut fresh = UserChannelActivity::new();
        for channel_id in channel_ids {
            cancel.check()?;

            let posts = self.fetch_posts(channel_id, previous).await?;
            fresh.union(&UserChannelActivity::from_posts(channel_id, &posts))?;
        }
        cancel.check()?;

        let mut merged = self.store.load_activity().await?;
        let baseline_users = merged.user_count();
        merged.union(&fresh)?;

        self.store.set_cursor(Cursor::At(now)).await?;
        if let Err(e) = self.store.save_activity(&merged).await {
            tracing::error!(error = %e, "Failed to save activity baseline, restoring cursor");
            if let Err(restore) = self.store.set_cursor(previous).await {
                tracing::error!(error = %restore, cursor = %previous, "Failed to restore cursor");
            }
            return Err(AppError::Persistence(format!(
                "Failed to save activity baseline: {}",
                e
            )));
        }

        tracing::info!(
            new_users = fresh.user_count(),
            baseline_users,
            total_users = merged.user_count(),
            cursor = now,
            "Activity aggregated"
        );
        Ok(merged)
    }

    async fn fetch_posts(&self, channel_id: &str, cursor: Cursor) -> AppResult<Vec<Post>> {
        let result = match cursor {
            Cursor::Beginning => all_posts(self.platform.as_ref(), channel_id, self.page_size).await,
            Cursor::At(since) => self
                .platform
                .posts_since(channel_id, since)
                .await
                // `since` also returns edits of older posts
                .map(|posts| posts.into_iter().filter(|p| p.create_at > since).collect()),
        };

        result.map_err(|e| match e {
            AppError::UpstreamFetch(_) => e,
            other => AppError::UpstreamFetch(format!("channel {}: {}", channel_id, other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{KvStore, MemoryKvStore};
    use crate::services::platform::MockChatPlatform;
    use async_trait::async_trait;
    use mockall::predicate::{eq, function};

    fn post(id: &str, user_id: &str, channel_id: &str, create_at: i64) -> Post {
        Post {
            id: id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            create_at,
            delete_at: 0,
            post_type: String::new(),
        }
    }

    fn channels(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Memory store whose per-user activity writes fail while the key ends
    /// with the `failing` suffix
    struct FailingActivityWrites {
        inner: MemoryKvStore,
        failing: std::sync::Mutex<Option<&'static str>>,
    }

    impl FailingActivityWrites {
        fn new(suffix: &'static str) -> Self {
            Self {
                inner: MemoryKvStore::new(),
                failing: std::sync::Mutex::new(Some(suffix)),
            }
        }

        fn fail_on(&self, suffix: &'static str) {
            *self.failing.lock().unwrap() = Some(suffix);
        }

        fn recover(&self) {
            *self.failing.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl KvStore for FailingActivityWrites {
        async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> AppResult<()> {
            let failing = *self.failing.lock().unwrap();
            if let Some(suffix) = failing {
                if key.starts_with("activity:user:") && key.ends_with(suffix) {
                    return Err(AppError::Persistence("disk full".to_string()));
                }
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.inner.delete(key).await
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_first_run_pages_through_history() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_list_posts()
            .with(function(|c: &str| c == "c1"), eq(0), eq(2))
            .returning(|_, _, _| Ok(vec![post("p1", "u1", "c1", 1), post("p2", "u1", "c1", 2)]));
        platform
            .expect_list_posts()
            .with(function(|c: &str| c == "c1"), eq(1), eq(2))
            .returning(|_, _, _| Ok(vec![post("p3", "u2", "c1", 3)]));
        platform
            .expect_list_posts()
            .with(function(|c: &str| c == "c1"), eq(2), eq(2))
            .returning(|_, _, _| Ok(vec![]));

        let store = SuggestStore::new(Arc::new(MemoryKvStore::new()));
        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 2);

        let activity = aggregator
            .compute_activity(&channels(&["c1"]), &Cancellation::new())
            .await
            .unwrap();

        assert_eq!(activity.count("u1", "c1"), 2);
        assert_eq!(activity.count("u2", "c1"), 1);
        assert_eq!(store.load_activity().await.unwrap(), activity);
        assert!(matches!(store.cursor().await.unwrap(), Cursor::At(_)));
    }

    #[tokio::test]
    async fn test_incremental_run_merges_into_baseline() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_posts_since()
            .with(function(|c: &str| c == "c1"), eq(1_000))
            .returning(|_, _| {
                Ok(vec![
                    post("new", "u1", "c1", 1_500),
                    // edited post created before the cursor
                    post("edited", "u2", "c1", 500),
                ])
            });

        let store = SuggestStore::new(Arc::new(MemoryKvStore::new()));
        let mut baseline = UserChannelActivity::new();
        baseline.add("u1", "c1", 4).unwrap();
        baseline.add("u3", "c9", 1).unwrap();
        store.save_activity(&baseline).await.unwrap();
        store.set_cursor(Cursor::At(1_000)).await.unwrap();

        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 100);
        let activity = aggregator
            .compute_activity(&channels(&["c1"]), &Cancellation::new())
            .await
            .unwrap();

        assert_eq!(activity.count("u1", "c1"), 5);
        assert_eq!(activity.count("u2", "c1"), 0);
        assert_eq!(activity.count("u3", "c9"), 1);
        match store.cursor().await.unwrap() {
            Cursor::At(ms) => assert!(ms > 1_000),
            Cursor::Beginning => panic!("cursor was not advanced"),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_persists_nothing() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_posts_since()
            .with(function(|c: &str| c == "c1"), eq(10))
            .returning(|_, _| Ok(vec![post("p1", "u1", "c1", 11)]));
        platform
            .expect_posts_since()
            .with(function(|c: &str| c == "c2"), eq(10))
            .returning(|_, _| Err(AppError::NotFound("/channels/c2/posts".to_string())));

        let store = SuggestStore::new(Arc::new(MemoryKvStore::new()));
        store.set_cursor(Cursor::At(10)).await.unwrap();

        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 100);
        let err = aggregator
            .compute_activity(&channels(&["c1", "c2"]), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UpstreamFetch(_)));
        assert_eq!(store.cursor().await.unwrap(), Cursor::At(10));
        assert!(store.load_activity().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_write_failure_restores_cursor() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_posts_since()
            .returning(|_, _| Ok(vec![post("p1", "u1", "c1", 50)]));

        let store = SuggestStore::new(Arc::new(FailingActivityWrites::new("")));
        store.set_cursor(Cursor::At(20)).await.unwrap();

        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 100);
        let err = aggregator
            .compute_activity(&channels(&["c1"]), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(store.cursor().await.unwrap(), Cursor::At(20));
    }

    #[tokio::test]
    async fn test_retry_after_partial_baseline_write_counts_once() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_posts_since()
            .with(function(|c: &str| c == "c1"), eq(20))
            .returning(|_, _| Ok(vec![post("p1", "u1", "c1", 50)]));

        let kv = Arc::new(FailingActivityWrites::new(":u2"));
        kv.recover();
        let store = SuggestStore::new(kv.clone());
        let mut baseline = UserChannelActivity::new();
        baseline.add("u1", "c1", 1).unwrap();
        baseline.add("u2", "c2", 1).unwrap();
        store.save_activity(&baseline).await.unwrap();
        store.set_cursor(Cursor::At(20)).await.unwrap();
        kv.fail_on(":u2");

        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 100);
        let err = aggregator
            .compute_activity(&channels(&["c1"]), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(store.cursor().await.unwrap(), Cursor::At(20));
        assert_eq!(store.load_activity().await.unwrap().count("u1", "c1"), 1);

        kv.recover();
        let activity = aggregator
            .compute_activity(&channels(&["c1"]), &Cancellation::new())
            .await
            .unwrap();

        assert_eq!(activity.count("u1", "c1"), 2);
        assert_eq!(store.load_activity().await.unwrap().count("u1", "c1"), 2);
        assert_eq!(store.load_activity().await.unwrap().count("u2", "c2"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let platform = MockChatPlatform::new();
        let store = SuggestStore::new(Arc::new(MemoryKvStore::new()));
        let aggregator = ActivityAggregator::new(Arc::new(platform), store.clone(), 100);
        let cancel = Cancellation::new();
        cancel.cancel();

        let err = aggregator
            .compute_activity(&channels(&["c1"]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(store.cursor().await.unwrap(), Cursor::Beginning);
    }
}
