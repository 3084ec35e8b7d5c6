use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Runtime;

use ledgerflow_events::{EventEnvelope, InMemoryEventBus, Topic};
use ledgerflow_infra::consumer::ProjectionConsumer;
use ledgerflow_infra::store::{
    InMemoryLedgerStore, InMemoryProjectionStore, LedgerStore, PostgresLedgerStore,
    PostgresProjectionStore, ProjectionStore, migrate,
};
use ledgerflow_infra::{
    ConsumerWorker, DeadLetterQueue, EventDispatcher, GotenbergRenderer, LedgerService,
    OutboxRelay, RelayWorker, ServiceConfig, StatementService, SweeperWorker,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    ledgerflow_observability::init(&config.logging);

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let (ledger_store, projection_store) = open_stores(&config, &runtime)?;

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dead_letters = Arc::new(DeadLetterQueue::new());

    // Entry point for the request layer, which is hosted outside this binary.
    let _ledger = LedgerService::new(ledger_store.clone());

    let renderer = GotenbergRenderer::new(&config.renderer).context("renderer client")?;
    let statements = Arc::new(StatementService::new(
        projection_store.clone(),
        bus.clone(),
        renderer,
        config.statement_deadline,
    ));

    // Consumers subscribe before the relay starts publishing.
    let workers = vec![
        ConsumerWorker::spawn(
            "projection-consumer",
            &bus,
            Some(Topic::Account),
            EventDispatcher::new().with_handler(ProjectionConsumer::new(projection_store)),
            config.consumer_retry.clone(),
            dead_letters.clone(),
        )?,
        ConsumerWorker::spawn(
            "statement-consumer",
            &bus,
            Some(Topic::Statement),
            EventDispatcher::new().with_handler(statements.clone()),
            config.consumer_retry.clone(),
            dead_letters.clone(),
        )?,
        RelayWorker::spawn(
            "outbox-relay",
            OutboxRelay::new(ledger_store, bus.clone()),
            config.relay_interval,
        )?,
        SweeperWorker::spawn("statement-sweeper", statements, config.sweep_interval)?,
    ];
    tracing::info!(workers = workers.len(), "ledgerflow node running");

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    // Relay before consumers: its final drain still reaches them.
    for worker in workers.into_iter().rev() {
        worker.shutdown();
    }

    let dead = dead_letters.len()?;
    if dead > 0 {
        tracing::warn!(dead_letters = dead, "stopping with unprocessed dead letters");
    }
    tracing::info!("ledgerflow node stopped");
    Ok(())
}

fn open_stores(
    config: &ServiceConfig,
    runtime: &Runtime,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn ProjectionStore>)> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory stores");
        return Ok((
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryProjectionStore::new()),
        ));
    };

    let pool = runtime
        .block_on(PgPoolOptions::new().max_connections(10).connect(url))
        .context("failed to connect to postgres")?;
    runtime.block_on(migrate(&pool)).context("migrations failed")?;
    tracing::info!("connected to postgres");

    Ok((
        Arc::new(PostgresLedgerStore::new(pool.clone(), runtime.handle().clone())),
        Arc::new(PostgresProjectionStore::new(pool, runtime.handle().clone())),
    ))
}
