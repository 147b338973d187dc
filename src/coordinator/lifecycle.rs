//! Service lifecycle: connect, spawn consumers, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache::{CacheError, RedisCache};
use crate::config::ServiceConfig;
use crate::ingest::{EventStream, Termination};
use crate::metrics;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::{ElasticsearchIndex, MongoRecordStore};

use super::{ConsumerHandle, ContextError, ServiceContext, ServiceState};

impl ServiceContext {
    /// Connect every backend and provision schema.
    ///
    /// Startup flow:
    /// 1. Record store (MongoDB): connect, ping, ensure indexes
    /// 2. Search index (Elasticsearch): ping with retry, create index if absent
    /// 3. Query cache (Redis): connect with retry, then ping
    ///
    /// Any phase failing aborts startup; nothing is left half-open.
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: &ServiceConfig) -> Result<Self, ContextError> {
        let startup_start = Instant::now();
        config.validate()?;
        info!("Connecting error-insights backends...");

        // ========== PHASE 1: Record store ==========
        let phase_start = Instant::now();
        let mongo = MongoRecordStore::connect(
            &config.mongo_uri,
            &config.mongo_database,
            &config.mongo_collection,
            config.backend_timeout(),
        )
        .await
        .inspect_err(|_| metrics::record_connection_error("mongodb"))?;
        if let Err(e) = mongo.ensure_indexes().await {
            mongo.shutdown().await;
            return Err(e.into());
        }
        let mongo = Arc::new(mongo);
        metrics::record_startup_phase("record_store", phase_start.elapsed());

        // ========== PHASE 2: Search index ==========
        let phase_start = Instant::now();
        let index = ElasticsearchIndex::new(config.elasticsearch())?;
        let provisioned = retry("elasticsearch_connect", &RetryConfig::startup(), || async {
            index.ping().await?;
            index.ensure_index().await
        })
        .await;
        if let Err(e) = provisioned {
            metrics::record_connection_error("elasticsearch");
            mongo.shutdown().await;
            return Err(e.into());
        }
        metrics::record_startup_phase("search_index", phase_start.elapsed());

        // ========== PHASE 3: Query cache ==========
        let phase_start = Instant::now();
        let connected = async {
            let cache = RedisCache::connect(&config.redis_url).await?;
            cache.ping().await?;
            Ok::<_, CacheError>(cache)
        };
        let cache = match connected.await {
            Ok(cache) => cache,
            Err(e) => {
                metrics::record_connection_error("redis");
                mongo.shutdown().await;
                return Err(e.into());
            }
        };
        metrics::record_startup_phase("cache", phase_start.elapsed());

        let mut context = Self::new(mongo.clone(), Arc::new(index), Arc::new(cache))
            .with_ttls(config.search_ttl(), config.stats_ttl());
        context.mongo = Some(mongo);

        metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            elapsed_ms = startup_start.elapsed().as_millis() as u64,
            "Backends connected, service ready"
        );
        Ok(context)
    }

    /// Run a consumer over `stream` on its own task.
    ///
    /// The returned handle reports how the task ended; the context's
    /// [`shutdown`](Self::shutdown) stops it too.
    pub fn spawn_consumer(&self, stream: Arc<dyn EventStream>) -> ConsumerHandle {
        let consumer = self.consumer(stream);
        let state = consumer.state_receiver();

        let (stop, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop);
        self.consumers.lock().push(stop.clone());

        let task = tokio::spawn(async move {
            let termination = consumer.run(stop_rx).await;
            match &termination {
                Termination::Shutdown => info!("Consumer task finished"),
                other => error!(termination = %other, "Consumer task terminated"),
            }
            termination
        });

        self.state.send_replace(ServiceState::Running);
        ConsumerHandle { task, stop, state }
    }

    /// Stop all consumers and close backend connections.
    ///
    /// Consumers finish their in-flight batch; callers holding a
    /// [`ConsumerHandle`] can `wait()` for that.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.state.send_replace(ServiceState::ShuttingDown);

        let consumers: Vec<_> = self.consumers.lock().drain(..).collect();
        info!(consumers = consumers.len(), "Shutting down service");
        for stop in consumers {
            stop.send_replace(true);
        }

        if let Some(mongo) = &self.mongo {
            mongo.shutdown().await;
        } else {
            warn!("No driver-owned record store to close");
        }

        self.state.send_replace(ServiceState::Stopped);
        info!("Service stopped");
    }
}
