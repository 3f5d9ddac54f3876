//! Fresh-shop order fulfillment service

use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fresh_shop_orders::payment::{NatsPaymentGateway, PaymentGateway, UnavailablePaymentGateway};
use fresh_shop_orders::publisher::{EventPublisher, NatsPublisher, NoopPublisher};
use fresh_shop_orders::{http, AppConfig, OrderService, PgStore, StoreLedger};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let store = PgStore::connect(&config.database_url, config.max_connections).await?;
    store.migrate().await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(%url, error = %e, "NATS unavailable; events and online payment disabled");
                None
            }
        },
        None => None,
    };
    let (payments, events): (Arc<dyn PaymentGateway>, Arc<dyn EventPublisher>) = match nats {
        Some(client) => (
            Arc::new(NatsPaymentGateway::new(client.clone(), config.payment_subject.clone())),
            Arc::new(NatsPublisher::new(client)),
        ),
        None => (Arc::new(UnavailablePaymentGateway), Arc::new(NoopPublisher)),
    };

    let service = OrderService::new(Arc::new(store), Arc::new(StoreLedger), payments, events, config.order_sn_prefix.clone());
    let app = http::router(service).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("Fresh-shop orders listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
