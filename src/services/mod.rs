pub mod activity;
pub mod cancel;
pub mod cluster_job;
pub mod command;
pub mod directory;
pub mod ml;
pub mod platform;
pub mod recommendations;

pub use activity::ActivityAggregator;
pub use cancel::Cancellation;
pub use cluster_job::{ClusterJob, JobHandle, JobLock, JobSettings, LocalJobLock};
pub use platform::{ChatPlatform, MattermostClient};
pub use recommendations::{RecommendationService, RecommenderSettings};
