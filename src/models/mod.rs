pub mod activity;
pub mod platform;
pub mod recommendation;

pub use activity::{ChannelCounts, UserChannelActivity};
pub use platform::{Channel, Post, PostList, Team, User};
pub use recommendation::{ChannelScore, Cursor, PassState, PassSummary, ResetMode, Scope};
