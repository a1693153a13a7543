use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::models::{Channel, ResetMode};
use crate::services::recommendations::RecommendationService;

pub const TRIGGER: &str = "/suggest";

pub const NO_NEW_CHANNELS_TEXT: &str = "No new channels for you.";
pub const RESET_TEXT: &str = "Recommendations were cleared.";
pub const COMPUTED_TEXT: &str = "Recommendations were computed.";
pub const STILL_COMPUTING_TEXT: &str =
    "Recommendations are still being computed. Try `/suggest channels` again in a few minutes.";

pub const HELP_TEXT: &str = "###### Channel Suggestions - Slash Command Help
* `/suggest channels` - Suggests relevant channels for the user
* `/suggest reset` - Resets suggestions. For testing only.
* `/suggest compute` - Computes suggestions. For testing only.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    Help,
    Channels,
    Compute,
    Reset,
    Unknown(String),
}

impl CommandAction {
    /// Parses a full command line such as `/suggest channels`
    ///
    /// Returns `None` for lines addressed to another trigger.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        if words.next()? != TRIGGER {
            return None;
        }

        let action = match words.next() {
            None | Some("help") => CommandAction::Help,
            Some("channels") => CommandAction::Channels,
            Some("compute") => CommandAction::Compute,
            Some("reset") => CommandAction::Reset,
            Some(other) => CommandAction::Unknown(other.to_string()),
        };
        Some(action)
    }
}

/// Renders recommended channels as a markdown list
pub fn format_channel_list(channels: &[Channel]) -> String {
    if channels.is_empty() {
        return NO_NEW_CHANNELS_TEXT.to_string();
    }

    let mut text = String::from("Channels we recommend\n");
    for channel in channels {
        if channel.purpose.is_empty() {
            text.push_str(&format!(" * ~{}\n", channel.name));
        } else {
            text.push_str(&format!(" * ~{} - {}\n", channel.name, channel.purpose));
        }
    }
    text
}

/// Runs a slash command action and returns the reply shown to the user
///
/// Failures become a short message; the command surface never errors.
pub async fn execute(
    service: &Arc<RecommendationService>,
    action: &CommandAction,
    user_id: &str,
    team_id: Option<&str>,
    compute_timeout: Duration,
) -> String {
    match action {
        CommandAction::Help => HELP_TEXT.to_string(),
        CommandAction::Channels => {
            let channels = match service.scope_for(team_id) {
                Ok(scope) => service.get_recommendations(user_id, &scope).await,
                Err(e) => Err(e),
            };
            match channels {
                Ok(channels) => format_channel_list(&channels),
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to read recommendations");
                    "Can't retrieve your recommendations right now.".to_string()
                }
            }
        }
        CommandAction::Compute => match service.compute_now(compute_timeout).await {
            Ok(_) => COMPUTED_TEXT.to_string(),
            Err(AppError::ComputeInProgress) | Err(AppError::ComputeTimedOut(_)) => {
                STILL_COMPUTING_TEXT.to_string()
            }
            Err(e) => format!("Recommendations could not be computed: {}", e),
        },
        CommandAction::Reset => {
            let reset = match service.scope_for(team_id) {
                Ok(scope) => service.reset(user_id, &scope, ResetMode::Global).await,
                Err(e) => Err(e),
            };
            match reset {
                Ok(()) => RESET_TEXT.to_string(),
                Err(AppError::ComputeInProgress) => STILL_COMPUTING_TEXT.to_string(),
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to reset recommendations");
                    "Can't reset recommendations right now.".to_string()
                }
            }
        }
        CommandAction::Unknown(action) => {
            format!("Unknown action `{}`.\n{}", action, HELP_TEXT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, purpose: &str) -> Channel {
        Channel {
            id: format!("id-{}", name),
            team_id: "t1".to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            purpose: purpose.to_string(),
            delete_at: 0,
        }
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(CommandAction::parse("/suggest"), Some(CommandAction::Help));
        assert_eq!(CommandAction::parse("/suggest help"), Some(CommandAction::Help));
        assert_eq!(
            CommandAction::parse("  /suggest   channels "),
            Some(CommandAction::Channels)
        );
        assert_eq!(CommandAction::parse("/suggest compute"), Some(CommandAction::Compute));
        assert_eq!(CommandAction::parse("/suggest reset"), Some(CommandAction::Reset));
        assert_eq!(
            CommandAction::parse("/suggest add"),
            Some(CommandAction::Unknown("add".to_string()))
        );
    }

    #[test]
    fn test_parse_ignores_other_triggers() {
        assert_eq!(CommandAction::parse("/away"), None);
        assert_eq!(CommandAction::parse(""), None);
        assert_eq!(CommandAction::parse("/suggestions channels"), None);
    }

    #[test]
    fn test_format_channel_list() {
        let text = format_channel_list(&[channel("town", "General chat"), channel("random", "")]);
        assert_eq!(
            text,
            "Channels we recommend\n * ~town - General chat\n * ~random\n"
        );
    }

    #[test]
    fn test_format_empty_list() {
        assert_eq!(format_channel_list(&[]), NO_NEW_CHANNELS_TEXT);
    }
}
