use std::sync::Arc;

use suggestions_api::{
    config::Config,
    db::{self, SuggestStore},
    routes::{create_router, AppState},
    services::{
        ChatPlatform, ClusterJob, JobSettings, MattermostClient, RecommendationService,
        RecommenderSettings,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("suggestions_api=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    let (kv, job_lock) = db::connect(&config).await?;
    let store = SuggestStore::new(kv);
    tracing::info!(backend = store.backend(), "Store ready");

    let platform: Arc<dyn ChatPlatform> = Arc::new(MattermostClient::new(
        &config.platform_url,
        config.platform_token.clone(),
    ));

    let service = Arc::new(RecommendationService::new(
        platform,
        store.clone(),
        RecommenderSettings::from(&config),
    ));
    let shutdown = service.shutdown_token();

    let job_service = Arc::clone(&service);
    let job = ClusterJob::schedule(
        JobSettings::precalc(&config),
        job_lock,
        store,
        move |cancel| {
            let service = Arc::clone(&job_service);
            async move {
                service
                    .pre_calculate_recommendations(&cancel)
                    .await
                    .map(|_| ())
            }
        },
    )?;

    let app = create_router(AppState::new(service, &config));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    job.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
