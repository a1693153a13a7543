use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Chat platform entities (REST v4 shapes)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub purpose: String,
    /// Archive timestamp in milliseconds, 0 while the channel is live
    #[serde(default)]
    pub delete_at: i64,
}

impl Channel {
    pub fn is_archived(&self) -> bool {
        self.delete_at != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    /// Creation time in Unix milliseconds
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub delete_at: i64,
    #[serde(rename = "type", default)]
    pub post_type: String,
}

impl Post {
    /// System messages (joins, header changes, ...) and deleted posts are not activity
    pub fn counts_as_activity(&self) -> bool {
        self.delete_at == 0 && !self.post_type.starts_with("system_")
    }
}

/// Post listing as returned by the channel posts endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostList {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub posts: HashMap<String, Post>,
}

impl PostList {
    /// Posts in the listing's order; ids missing from `posts` are dropped
    pub fn into_posts(mut self) -> Vec<Post> {
        self.order
            .iter()
            .filter_map(|id| self.posts.remove(id))
            .collect()
    }
}
