//! Chat platform abstraction
//!
//! The recommendation pass only reads from the platform: the team directory,
//! channel posts and single channel lookups. Listing endpoints are paged;
//! an empty page ends the stream.

use std::future::Future;

use crate::{
    error::{AppError, AppResult},
    models::{Channel, Post, Team, User},
};

pub mod mattermost;

pub use mattermost::MattermostClient;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn list_teams(&self, page: u32, per_page: u32) -> AppResult<Vec<Team>>;

    async fn list_team_members(&self, team_id: &str, page: u32, per_page: u32)
        -> AppResult<Vec<User>>;

    /// Public channels of a team, archived ones included
    async fn list_public_channels(
        &self,
        team_id: &str,
        page: u32,
        per_page: u32,
    ) -> AppResult<Vec<Channel>>;

    async fn list_posts(&self, channel_id: &str, page: u32, per_page: u32) -> AppResult<Vec<Post>>;

    /// Posts created or modified after `since_ms` (Unix milliseconds)
    async fn posts_since(&self, channel_id: &str, since_ms: i64) -> AppResult<Vec<Post>>;

    async fn get_channel(&self, channel_id: &str) -> AppResult<Channel>;

    /// Clone platform client for parallel task execution
    fn clone_for_task(&self) -> Box<dyn ChatPlatform>;

    /// Platform name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Requests pages starting at 0 until one comes back empty
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> AppResult<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut page = 0u32;
    loop {
        let batch = fetch(page).await?;
        if batch.is_empty() {
            return Ok(items);
        }
        items.extend(batch);
        page = page
            .checked_add(1)
            .ok_or_else(|| AppError::UpstreamFetch("Page counter overflowed".to_string()))?;
    }
}

pub async fn all_teams(platform: &dyn ChatPlatform, per_page: u32) -> AppResult<Vec<Team>> {
    drain_pages(|page| platform.list_teams(page, per_page)).await
}

pub async fn all_team_members(
    platform: &dyn ChatPlatform,
    team_id: &str,
    per_page: u32,
) -> AppResult<Vec<User>> {
    drain_pages(|page| platform.list_team_members(team_id, page, per_page)).await
}

pub async fn all_public_channels(
    platform: &dyn ChatPlatform,
    team_id: &str,
    per_page: u32,
) -> AppResult<Vec<Channel>> {
    drain_pages(|page| platform.list_public_channels(team_id, page, per_page)).await
}

pub async fn all_posts(
    platform: &dyn ChatPlatform,
    channel_id: &str,
    per_page: u32,
) -> AppResult<Vec<Post>> {
    drain_pages(|page| platform.list_posts(channel_id, page, per_page)).await
}

/// Fetch several channels in parallel
///
/// Channels whose lookup fails are logged and left out; the rest keep the
/// order of `channel_ids`.
pub async fn lookup_channels(platform: &dyn ChatPlatform, channel_ids: Vec<String>) -> Vec<Channel> {
    let mut tasks = Vec::new();

    for channel_id in channel_ids {
        let platform = platform.clone_for_task();
        let task = tokio::spawn(async move {
            let result = platform.get_channel(&channel_id).await;
            (channel_id, result)
        });
        tasks.push(task);
    }

    let mut channels = Vec::new();
    let mut failures = 0usize;

    for task in tasks {
        match task.await {
            Ok((_, Ok(channel))) => channels.push(channel),
            Ok((channel_id, Err(e))) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Channel lookup failed");
                failures += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Task join error");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        tracing::warn!(
            success_count = channels.len(),
            error_count = failures,
            "Partial channel lookup failure"
        );
    }

    channels
}
