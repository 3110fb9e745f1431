//! Startup orchestration.
//!
//! # Responsibilities
//! - Open storage and verify it is reachable
//! - Build processor clients, the queue and the dispatch engine
//! - Start workers, the spill scheduler and the admin API
//! - Run the payment listener, then wind everything down in order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener is handed in already bound, so traffic only starts once everything else is ready
//! - Shutdown order: stop accepting, let connections finish, stop the scheduler, drain workers
//!   together with detached dispatches and inserts

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::config::{GatewayConfig, StorageConfig};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::payments::postgres::PostgresPaymentStore;
use crate::payments::{
    DispatchEngine, HttpProcessor, InMemoryPaymentStore, PaymentProcessor, PaymentStore, Processor,
    ProcessorError, StoreError,
};
use crate::queue::{spawn_spill_retry, DrainReport, RetryQueue, WorkerPool};
use crate::resilience::{with_timeout, RetryPolicy, TimeoutError};
use crate::routing::Router;

/// How long open connections get to finish after the listener stops.
const CONNECTION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),
    #[error("Storage unavailable: {0}")]
    StorageTimeout(#[from] TimeoutError),
    #[error("Invalid processor: {0}")]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("Failed to bind admin API on {addr}: {source}")]
    Admin {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    engine: Arc<DispatchEngine>,
    store: Arc<dyn PaymentStore>,
    router: Arc<Router>,
    shutdown: Shutdown,
}

impl Gateway {
    /// Open storage and build processor clients from `config`.
    pub async fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        let store = open_store(&config).await?;

        let timeouts = &config.timeouts;
        let default = HttpProcessor::new(
            Processor::Default,
            &config.processors.default_url,
            timeouts.processor_connect(),
            timeouts.processor_request(),
        )?;
        let fallback = HttpProcessor::new(
            Processor::Fallback,
            &config.processors.fallback_url,
            timeouts.processor_connect(),
            timeouts.processor_request(),
        )?;

        Ok(Self::build_with(config, Arc::new(default), Arc::new(fallback), store))
    }

    /// Wire the gateway around already constructed collaborators.
    pub fn build_with(
        config: GatewayConfig,
        default: Arc<dyn PaymentProcessor>,
        fallback: Arc<dyn PaymentProcessor>,
        store: Arc<dyn PaymentStore>,
    ) -> Self {
        let queue = Arc::new(RetryQueue::new(
            config.queue.capacity,
            config.queue.dead_letter_capacity,
        ));
        let engine = DispatchEngine::new(
            default,
            fallback,
            Arc::clone(&store),
            queue,
            RetryPolicy::new(&config.retries),
            config.dispatch.max_in_flight,
        )
        .with_store_timeout(config.timeouts.storage());
        let engine = Arc::new(engine);
        let router = Arc::new(Router::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            config.timeouts.storage(),
        ));

        Self {
            config,
            engine,
            store,
            router,
            shutdown: Shutdown::new(),
        }
    }

    /// Handle that stops [`Gateway::run`] when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        self.engine.queue()
    }

    /// Serve on `listener` until shutdown, then drain the queue.
    pub async fn run(self, listener: Listener) -> Result<DrainReport, StartupError> {
        let shutdown = self.shutdown.clone();
        let queue = Arc::clone(self.engine.queue());

        let workers = WorkerPool::spawn(self.config.queue.workers, Arc::clone(&self.engine), &shutdown);
        let scheduler = spawn_spill_retry(
            Arc::clone(&queue),
            self.config.queue.retry_interval(),
            shutdown.subscribe(),
        );

        let server = HttpServer::new(
            Arc::clone(&self.router),
            self.config.limits,
            self.config.timeouts.idle(),
        );
        let tracker = server.tracker();

        let admin = if self.config.admin.enabled {
            let state = AdminState {
                queue: Arc::clone(&queue),
                store: Arc::clone(&self.store),
                connections: tracker.clone(),
                api_key: Arc::from(self.config.admin.api_key.as_str()),
                store_timeout: self.config.timeouts.storage(),
            };
            match start_admin(&self.config.admin.bind_address, state, &shutdown).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    shutdown.trigger();
                    workers.shutdown(Duration::ZERO).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(
            workers = workers.size(),
            queue_capacity = queue.capacity(),
            "Gateway ready"
        );
        let served = server.run(listener, shutdown.clone()).await;
        // An accept loop failure stops everything else too.
        shutdown.trigger();

        let still_open = tracker.wait_for_idle(CONNECTION_GRACE).await;
        if still_open > 0 {
            tracing::warn!(connections = still_open, "Connections still open at shutdown");
        }
        if let Err(e) = scheduler.await {
            tracing::error!(error = %e, "Spill scheduler task failed");
        }
        let report = workers.shutdown(self.config.shutdown.drain_timeout()).await;

        if let Some(admin) = admin {
            if let Err(e) = admin.await {
                tracing::error!(error = %e, "Admin API task failed");
            }
        }

        served?;
        tracing::info!("Shutdown complete");
        Ok(report)
    }
}

/// Open the configured store and check it answers.
async fn open_store(config: &GatewayConfig) -> Result<Arc<dyn PaymentStore>, StartupError> {
    match &config.storage {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory payment store");
            Ok(Arc::new(InMemoryPaymentStore::new()))
        }
        StorageConfig::Postgres(pg) => {
            let limit = config.timeouts.storage();
            let store = PostgresPaymentStore::new(pg)?;
            with_timeout("storage ping", limit, store.ping()).await??;
            with_timeout("storage schema", limit, store.ensure_schema()).await??;
            tracing::info!(host = %pg.host, port = pg.port, dbname = %pg.dbname, "Connected to PostgreSQL");
            Ok(Arc::new(store))
        }
    }
}

async fn start_admin(
    bind_address: &str,
    state: AdminState,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|source| StartupError::Admin {
            addr: bind_address.to_string(),
            source,
        })?;
    let signal = shutdown.subscribe();
    Ok(tokio::spawn(async move {
        if let Err(e) = admin::serve(listener, state, signal).await {
            tracing::error!(error = %e, "Admin API stopped");
        }
    }))
}
