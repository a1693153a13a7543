use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::AppResult;
use crate::models::{Channel, Scope, Team};
use crate::services::cancel::Cancellation;
use crate::services::platform::{all_public_channels, all_team_members, all_teams, ChatPlatform};

/// Snapshot of teams, their live public channels and their human members
///
/// Taken once at the start of a pass so every phase works on the same view.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    teams: Vec<Team>,
    channels_by_team: BTreeMap<String, Vec<Channel>>,
    members_by_team: BTreeMap<String, BTreeSet<String>>,
}

impl Directory {
    pub async fn load(
        platform: &dyn ChatPlatform,
        per_page: u32,
        cancel: &Cancellation,
    ) -> AppResult<Self> {
        let teams = all_teams(platform, per_page).await?;
        let mut directory = Self::default();

        for team in teams {
            cancel.check()?;

            let channels: Vec<Channel> = all_public_channels(platform, &team.id, per_page)
                .await?
                .into_iter()
                .filter(|c| !c.is_archived())
                .collect();
            let members: BTreeSet<String> = all_team_members(platform, &team.id, per_page)
                .await?
                .into_iter()
                .filter(|u| !u.is_bot)
                .map(|u| u.id)
                .collect();

            tracing::debug!(
                team_id = %team.id,
                channels = channels.len(),
                members = members.len(),
                "Loaded team directory"
            );

            directory.channels_by_team.insert(team.id.clone(), channels);
            directory.members_by_team.insert(team.id.clone(), members);
            directory.teams.push(team);
        }

        tracing::info!(
            platform = platform.name(),
            teams = directory.teams.len(),
            "Loaded directory"
        );
        Ok(directory)
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    /// Every public channel id across all teams, sorted and deduplicated
    pub fn channel_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .channels_by_team
            .values()
            .flatten()
            .map(|c| c.id.as_str())
            .collect();
        ids.into_iter().map(str::to_string).collect()
    }

    pub fn team_channel_ids(&self, team_id: &str) -> HashSet<String> {
        self.channels_by_team
            .get(team_id)
            .map(|channels| channels.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn team_members(&self, team_id: &str) -> HashSet<String> {
        self.members_by_team
            .get(team_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_members(&self) -> BTreeSet<String> {
        self.members_by_team.values().flatten().cloned().collect()
    }

    /// Channels a user may be recommended within `scope`, sorted by id
    pub fn candidate_channels(&self, scope: &Scope, user_id: &str) -> Vec<String> {
        let ids: BTreeSet<&str> = match scope {
            Scope::Team(team_id) => self
                .channels_by_team
                .get(team_id)
                .into_iter()
                .flatten()
                .map(|c| c.id.as_str())
                .collect(),
            Scope::Global => self
                .members_by_team
                .iter()
                .filter(|(_, members)| members.contains(user_id))
                .filter_map(|(team_id, _)| self.channels_by_team.get(team_id))
                .flatten()
                .map(|c| c.id.as_str())
                .collect(),
        };
        ids.into_iter().map(str::to_string).collect()
    }

    #[cfg(test)]
    pub(crate) fn insert_team(&mut self, team: Team, channels: Vec<Channel>, members: &[&str]) {
        self.channels_by_team.insert(team.id.clone(), channels);
        self.members_by_team.insert(
            team.id.clone(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self.teams.push(team);
    }
}
