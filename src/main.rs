use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;

use relay_billing::billing::{
    spawn_billing_scheduler, BillingService, Channel, FsDocumentStorage, PgBillingStore,
};
use relay_billing::config;
use relay_billing::dispatch::{
    ChannelTransport, Dispatcher, HttpRelayTransport, UnconfiguredTransport,
};
use relay_billing::extractor::ApiKeyConfig;
use relay_billing::rate_limit::ApiRateLimiter;
use relay_billing::telemetry;

fn transport(
    channel: Channel,
    endpoint: Option<&str>,
    token: Option<String>,
) -> anyhow::Result<Arc<dyn ChannelTransport>> {
    match endpoint {
        Some(endpoint) => Ok(Arc::new(HttpRelayTransport::new(endpoint, token)?)),
        None => {
            tracing::warn!(channel = channel.as_str(), "no relay configured; sends will fail");
            Ok(Arc::new(UnconfiguredTransport { channel }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    // Fail fast if the API key is missing
    let api_key = config::API_KEY
        .clone()
        .ok_or_else(|| anyhow::anyhow!("API_KEY or API_KEY_FILE must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let store = Arc::new(PgBillingStore::new(pool.clone()));
    let documents = Arc::new(FsDocumentStorage::new(config::BILLING_DOCUMENT_DIR.as_str()));
    let service = BillingService::new(
        store.clone(),
        store.clone(),
        documents,
        Arc::new(config::TARIFF.clone()),
    );
    tracing::info!(tariff = ?service.tariff(), "billing tariff loaded");

    let dispatcher = Dispatcher::new(
        service.gate().clone(),
        store,
        transport(
            Channel::Chat,
            config::CHAT_RELAY_URL.as_deref(),
            config::CHAT_RELAY_TOKEN.clone(),
        )?,
        transport(
            Channel::Mail,
            config::MAIL_RELAY_URL.as_deref(),
            config::MAIL_RELAY_TOKEN.clone(),
        )?,
    )
    .with_retry(*config::CHAT_RETRY, *config::MAIL_RETRY);

    spawn_billing_scheduler(service.clone(), *config::SWEEP_SCHEDULE);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    tracing::info!(rate_limit = ?*config::RATE_LIMIT, "api rate limit loaded");
    let app = relay_billing::app(
        service,
        dispatcher,
        ApiKeyConfig::new(api_key),
        ApiRateLimiter::new(*config::RATE_LIMIT),
    )
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
