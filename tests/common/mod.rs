#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use suggestions_api::db::{MemoryKvStore, SuggestStore};
use suggestions_api::error::{AppError, AppResult};
use suggestions_api::models::{Channel, Post, Team, User};
use suggestions_api::services::{ChatPlatform, RecommendationService, RecommenderSettings};

#[derive(Default)]
struct Workspace {
    teams: Vec<Team>,
    members: HashMap<String, Vec<User>>,
    channels: HashMap<String, Vec<Channel>>,
    posts: HashMap<String, Vec<Post>>,
    next_post: i64,
}

/// In-memory chat platform with a mutable workspace
#[derive(Clone, Default)]
pub struct FakePlatform {
    workspace: Arc<RwLock<Workspace>>,
    delay: Option<Duration>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every team listing sleeps for `delay` first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_team(&self, team_id: &str) {
        let mut ws = self.workspace.write().unwrap();
        ws.teams.push(Team {
            id: team_id.to_string(),
            name: team_id.to_string(),
            display_name: team_id.to_string(),
        });
    }

    pub fn add_member(&self, team_id: &str, user_id: &str, is_bot: bool) {
        let mut ws = self.workspace.write().unwrap();
        ws.members.entry(team_id.to_string()).or_default().push(User {
            id: user_id.to_string(),
            username: user_id.to_string(),
            is_bot,
        });
    }

    pub fn add_channel(&self, team_id: &str, channel_id: &str, purpose: &str) {
        let mut ws = self.workspace.write().unwrap();
        ws.channels
            .entry(team_id.to_string())
            .or_default()
            .push(Channel {
                id: channel_id.to_string(),
                team_id: team_id.to_string(),
                name: format!("{}-name", channel_id),
                display_name: channel_id.to_string(),
                purpose: purpose.to_string(),
                delete_at: 0,
            });
    }

    pub fn archive_channel(&self, channel_id: &str) {
        let mut ws = self.workspace.write().unwrap();
        for channels in ws.channels.values_mut() {
            for channel in channels.iter_mut().filter(|c| c.id == channel_id) {
                channel.delete_at = 1;
            }
        }
    }

    pub fn remove_channel(&self, channel_id: &str) {
        let mut ws = self.workspace.write().unwrap();
        for channels in ws.channels.values_mut() {
            channels.retain(|c| c.id != channel_id);
        }
    }

    /// Adds `count` posts by `user_id`, newer than every existing post
    pub fn add_posts(&self, channel_id: &str, user_id: &str, count: usize) {
        let mut ws = self.workspace.write().unwrap();
        for _ in 0..count {
            ws.next_post += 1;
            let id = ws.next_post;
            ws.posts.entry(channel_id.to_string()).or_default().push(Post {
                id: format!("post{}", id),
                user_id: user_id.to_string(),
                channel_id: channel_id.to_string(),
                create_at: chrono::Utc::now().timestamp_millis() - 3_600_000 + id,
                delete_at: 0,
                post_type: String::new(),
            });
        }
    }

    /// Adds posts stamped with the current time
    pub fn add_recent_posts(&self, channel_id: &str, user_id: &str, count: usize) {
        let mut ws = self.workspace.write().unwrap();
        for _ in 0..count {
            ws.next_post += 1;
            let id = ws.next_post;
            ws.posts.entry(channel_id.to_string()).or_default().push(Post {
                id: format!("post{}", id),
                user_id: user_id.to_string(),
                channel_id: channel_id.to_string(),
                create_at: chrono::Utc::now().timestamp_millis() + 1,
                delete_at: 0,
                post_type: String::new(),
            });
        }
    }
}

fn page<T: Clone>(items: &[T], page: u32, per_page: u32) -> Vec<T> {
    let start = page as usize * per_page as usize;
    items
        .iter()
        .skip(start)
        .take(per_page as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn list_teams(&self, page_no: u32, per_page: u32) -> AppResult<Vec<Team>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let ws = self.workspace.read().unwrap();
        Ok(page(&ws.teams, page_no, per_page))
    }

    async fn list_team_members(
        &self,
        team_id: &str,
        page_no: u32,
        per_page: u32,
    ) -> AppResult<Vec<User>> {
        let ws = self.workspace.read().unwrap();
        let members = ws.members.get(team_id).cloned().unwrap_or_default();
        Ok(page(&members, page_no, per_page))
    }

    async fn list_public_channels(
        &self,
        team_id: &str,
        page_no: u32,
        per_page: u32,
    ) -> AppResult<Vec<Channel>> {
        let ws = self.workspace.read().unwrap();
        let channels = ws.channels.get(team_id).cloned().unwrap_or_default();
        Ok(page(&channels, page_no, per_page))
    }

    async fn list_posts(&self, channel_id: &str, page_no: u32, per_page: u32) -> AppResult<Vec<Post>> {
        let ws = self.workspace.read().unwrap();
        let posts = ws.posts.get(channel_id).cloned().unwrap_or_default();
        Ok(page(&posts, page_no, per_page))
    }

    async fn posts_since(&self, channel_id: &str, since_ms: i64) -> AppResult<Vec<Post>> {
        let ws = self.workspace.read().unwrap();
        Ok(ws
            .posts
            .get(channel_id)
            .map(|posts| {
                posts
                    .iter()
                    .filter(|p| p.create_at > since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_channel(&self, channel_id: &str) -> AppResult<Channel> {
        let ws = self.workspace.read().unwrap();
        ws.channels
            .values()
            .flatten()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("/channels/{}", channel_id)))
    }

    fn clone_for_task(&self) -> Box<dyn ChatPlatform> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Team `t1` with chan1..chan4 and user1..user3 (plus a bot)
///
/// Post counts per user: user1 {chan1: 1, chan2: 2, chan3: 3},
/// user2 {chan2: 4, chan3: 2, chan4: 1}, user3 {chan1: 3, chan3: 2, chan4: 5}.
pub fn fixture_platform() -> FakePlatform {
    let platform = FakePlatform::new();
    platform.add_team("t1");
    for user in ["user1", "user2", "user3"] {
        platform.add_member("t1", user, false);
    }
    platform.add_member("t1", "bot", true);
    platform.add_channel("t1", "chan1", "General discussion");
    platform.add_channel("t1", "chan2", "");
    platform.add_channel("t1", "chan3", "Release planning");
    platform.add_channel("t1", "chan4", "Infrastructure");

    for (user, channel, count) in [
        ("user1", "chan1", 1),
        ("user1", "chan2", 2),
        ("user1", "chan3", 3),
        ("user2", "chan2", 4),
        ("user2", "chan3", 2),
        ("user2", "chan4", 1),
        ("user3", "chan1", 3),
        ("user3", "chan3", 2),
        ("user3", "chan4", 5),
        ("bot", "chan1", 50),
    ] {
        platform.add_posts(channel, user, count);
    }
    platform
}

pub fn fixture_settings() -> RecommenderSettings {
    RecommenderSettings {
        neighbors: 2,
        adaptive_neighbors: false,
        recommendation_count: 5,
        page_size: 2,
        ..RecommenderSettings::default()
    }
}

pub fn memory_store() -> SuggestStore {
    SuggestStore::new(Arc::new(MemoryKvStore::new()))
}

pub fn service(
    platform: FakePlatform,
    store: SuggestStore,
    settings: RecommenderSettings,
) -> Arc<RecommendationService> {
    Arc::new(RecommendationService::new(Arc::new(platform), store, settings))
}
