use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use dispatch_service::{
    api::{AppState, run_api_server},
    clients::{
        audit::{AuditSink, LogAuditSink},
        circuit_breaker::CircuitBreaker,
        database::DatabaseClient,
        health::HealthChecker,
        history::AttemptHistory,
        queue::MessageQueue,
        rate_limiter::RateLimiter,
        rbmq::RabbitMqClient,
        redis::RedisStore,
        store::SharedStore,
    },
    config::Config,
    providers::registry::ProviderRegistry,
    services::{consumer::QueueConsumer, dispatcher::Dispatcher, selector::ProviderSelector},
    utils::{init_tracing, retry_with_backoff},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;

    let config = Config::load()?;
    let retry_config = config.retry_config();

    let registry = Arc::new(ProviderRegistry::from_configs(
        &config.load_providers()?,
        &retry_config,
    )?);

    let store: Arc<dyn SharedStore> = Arc::new(
        retry_with_backoff(&retry_config, || RedisStore::connect(&config.redis_url)).await?,
    );

    let queue: Arc<dyn MessageQueue> =
        Arc::new(retry_with_backoff(&retry_config, || RabbitMqClient::connect(&config)).await?);

    let audit: Arc<dyn AuditSink> = match &config.database_url {
        Some(database_url) => Arc::new(
            retry_with_backoff(&retry_config, || DatabaseClient::connect(database_url)).await?,
        ),
        None => {
            info!("No database configured, delivery attempts are logged only");
            Arc::new(LogAuditSink)
        }
    };

    let history = Arc::new(AttemptHistory::default());
    let health_config = config.health_check_config();
    let cache_ttl = health_config.interval;

    let breaker = CircuitBreaker::new(Arc::clone(&store), config.circuit_breaker_config());
    let rate_limiter = RateLimiter::new(Arc::clone(&store), config.rate_limit_config());
    let health_checker = HealthChecker::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&history),
        health_config,
    );
    let selector = ProviderSelector::new(
        Arc::clone(&registry),
        breaker.clone(),
        health_checker.clone(),
        Arc::clone(&store),
        cache_ttl,
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        selector,
        breaker.clone(),
        rate_limiter,
        history,
        audit,
        config.failover_config(),
    );

    let api_state = Arc::new(AppState {
        health_checker,
        circuit_breaker: breaker,
        registry,
    });
    let port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = run_api_server(api_state, port).await {
            error!(error = %e, "Health check server stopped");
        }
    });

    let consumer = Arc::new(QueueConsumer::new(
        queue,
        dispatcher,
        store,
        config.queue_config(),
    ));

    let idle_wait = config.queue_poll_interval();
    let workers: Vec<_> = (0..config.worker_concurrency.max(1))
        .map(|_| {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.run(idle_wait).await })
        })
        .collect();

    info!(workers = workers.len(), "Dispatch workers started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow!("Failed to listen for shutdown signal: {}", e))?;

    info!("Shutdown signal received, stopping workers");
    for worker in workers {
        worker.abort();
    }

    Ok(())
}
