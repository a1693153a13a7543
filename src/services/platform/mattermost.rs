/// Mattermost REST v4 client
///
/// Authenticates with a personal access or bot token sent as a bearer
/// header. Only read endpoints are used.
use crate::{
    error::{AppError, AppResult},
    models::{Channel, Post, PostList, Team, User},
    services::platform::ChatPlatform,
};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;

#[derive(Clone)]
pub struct MattermostClient {
    http_client: HttpClient,
    base_url: String,
    token: String,
}

impl MattermostClient {
    pub fn new(base_url: &str, token: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = self.url(path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamFetch(format!(
                "Mattermost API returned status {} for {}: {}",
                status, path, body
            )));
        }

        let parsed = response.json().await?;
        Ok(parsed)
    }
}

fn paging(page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("per_page", per_page.to_string())]
}

#[async_trait::async_trait]
impl ChatPlatform for MattermostClient {
    async fn list_teams(&self, page: u32, per_page: u32) -> AppResult<Vec<Team>> {
        self.get_json("/teams", &paging(page, per_page)).await
    }

    async fn list_team_members(
        &self,
        team_id: &str,
        page: u32,
        per_page: u32,
    ) -> AppResult<Vec<User>> {
        let mut query = paging(page, per_page);
        query.push(("in_team", team_id.to_string()));
        self.get_json("/users", &query).await
    }

    async fn list_public_channels(
        &self,
        team_id: &str,
        page: u32,
        per_page: u32,
    ) -> AppResult<Vec<Channel>> {
        let mut query = paging(page, per_page);
        query.push(("include_deleted", "true".to_string()));
        self.get_json(&format!("/teams/{}/channels", team_id), &query)
            .await
    }

    async fn list_posts(&self, channel_id: &str, page: u32, per_page: u32) -> AppResult<Vec<Post>> {
        let list: PostList = self
            .get_json(
                &format!("/channels/{}/posts", channel_id),
                &paging(page, per_page),
            )
            .await?;
        Ok(list.into_posts())
    }

    async fn posts_since(&self, channel_id: &str, since_ms: i64) -> AppResult<Vec<Post>> {
        let list: PostList = self
            .get_json(
                &format!("/channels/{}/posts", channel_id),
                &[("since", since_ms.to_string())],
            )
            .await?;
        Ok(list.into_posts())
    }

    async fn get_channel(&self, channel_id: &str) -> AppResult<Channel> {
        self.get_json(&format!("/channels/{}", channel_id), &[])
            .await
    }

    fn clone_for_task(&self) -> Box<dyn ChatPlatform> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "mattermost"
    }
}
