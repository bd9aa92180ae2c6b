use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use furnishing_orders::config::AppConfig;
use furnishing_orders::domain::order::{Actor, FieldChange, LineItemDraft, NewOrder, OrderTypeTag, PaymentMethod};
use furnishing_orders::domain::subsystems::SubsystemGateway;
use furnishing_orders::finance::FinancialCalculator;
use furnishing_orders::http::{self, ApiState};
use furnishing_orders::integrations::{InMemoryContractStorage, RecordingInventory, StaticDirectory};
use furnishing_orders::metrics::Metrics;
use furnishing_orders::service::{OrderService, ServiceSettings};
use furnishing_orders::store::{InMemoryStore, OrderStore, PostgresStore};
use furnishing_orders::worker::{spawn_worker, DeadLetterQueue, OrderWorker, WorkerDispatcher};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,furnishing_orders=debug"))
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(http_port = config.http.port, defer_recompute = config.finance.defer_recompute, "Starting order core");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Storage ===
    let (store, subsystems): (Arc<dyn OrderStore>, Arc<dyn SubsystemGateway>) = match &config.database.url {
        Some(url) => {
            tracing::info!("Connecting to Postgres");
            let store = Arc::new(PostgresStore::connect(url, config.database.max_connections).await?);
            store.migrate().await?;
            (store.clone() as Arc<dyn OrderStore>, store as Arc<dyn SubsystemGateway>)
        }
        None => {
            tracing::info!("No database configured, using in-memory store");
            let store = Arc::new(InMemoryStore::new());
            (store.clone() as Arc<dyn OrderStore>, store as Arc<dyn SubsystemGateway>)
        }
    };

    // === 3. Background worker ===
    let dlq = DeadLetterQueue::new();
    let worker = spawn_worker(OrderWorker::new(
        store.clone(),
        Arc::new(FinancialCalculator::new(store.clone(), metrics.clone())),
        Arc::new(InMemoryContractStorage::new()),
        dlq.clone(),
        config.retry_config(),
        metrics.clone(),
    ));

    // === 4. Order service ===
    let directory = Arc::new(StaticDirectory::new());
    let service = Arc::new(
        OrderService::new(
            store,
            subsystems,
            directory.clone(),
            Arc::new(RecordingInventory::new()),
            metrics.clone(),
            ServiceSettings::from(&config),
        )
        .with_dispatcher(Arc::new(WorkerDispatcher::new(worker, metrics.clone()))),
    );

    // === 5. Demonstrate an order lifecycle ===
    let clerk = Actor::new(Uuid::new_v4(), "Front desk");
    let customer_id = Uuid::new_v4();
    directory.add_customer(customer_id, "Demo Customer");

    let order = service
        .create_order(
            NewOrder::new(customer_id, vec![OrderTypeTag::Installation])
                .with_expected_delivery((Utc::now() + Duration::days(21)).date_naive())
                .with_contract_number("C-DEMO-1")
                .with_item(LineItemDraft::new(Uuid::new_v4(), "Blackout curtain", dec!(2), dec!(100), dec!(10)))
                .with_item(LineItemDraft::from_form(Uuid::new_v4(), "Curtain rod", "1", "50,00", "0")),
            Some(&clerk),
        )
        .await?;
    tracing::info!(order_id = %order.id, subtotal = %order.subtotal, final_payable = %order.final_payable(), "Order created");

    service
        .update_fields(
            order.id,
            &[FieldChange::Notes(Some("Call before installation".to_string()))],
            Some(&clerk),
            "Demo edit",
        )
        .await?;
    service
        .record_payment(order.id, dec!(100), PaymentMethod::Cash, None, Some(&clerk))
        .await?;

    let status = service.current_status(order.id).await?;
    let remaining = service.remaining_balance(order.id).await?;
    tracing::info!(
        order_id = %order.id,
        status = %status.resolved.status,
        source = ?status.resolved.source,
        badge = %status.badge.label,
        remaining = %remaining,
        "Order status"
    );

    let pruned = service.prune_automatic_audit(config.audit_retention()).await?;
    let dead_letters = dlq.stats().await.total_messages;
    tracing::info!(pruned, dead_letters, "Demo complete");

    // === 6. HTTP surface ===
    http::serve(
        ApiState {
            service,
            registry: metrics.registry().clone(),
        },
        config.http.port,
    )
    .await?;

    Ok(())
}
