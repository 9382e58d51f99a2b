use super::ingestion::OrderIngestionConsumer;
use super::otp::OtpCoordinator;
use super::publisher::EventPublisher;
use super::service::PaymentService;
use super::settlement::{SettlementExecutor, SettlementPool};
use crate::config::GatewayConfig;
use crate::domain::ports::{
    CodeDeliveryRef, DistributedLockRef, EventBusRef, PaymentStoreRef, SettlementProviderRef,
};
use crate::error::Result;
use crate::infrastructure::in_memory::{InMemoryDistributedLock, InMemoryPaymentStore};
use crate::infrastructure::memory_bus::InMemoryEventBus;
use crate::infrastructure::simulated::{LoggingCodeDelivery, SimulatedSettlementProvider};
use std::sync::Arc;

/// The collaborators the gateway runs against.
#[derive(Clone)]
pub struct Adapters {
    pub store: PaymentStoreRef,
    pub lock: DistributedLockRef,
    pub bus: EventBusRef,
    pub provider: SettlementProviderRef,
    pub delivery: CodeDeliveryRef,
}

impl Adapters {
    /// Fully in-process adapters. The bus is also returned concretely so
    /// callers can feed and inspect it.
    pub fn in_memory(config: &GatewayConfig) -> (Self, InMemoryEventBus) {
        let bus = InMemoryEventBus::new(config.bus.partitions);
        let adapters = Self {
            store: Arc::new(InMemoryPaymentStore::new()),
            lock: Arc::new(InMemoryDistributedLock::new()),
            bus: Arc::new(bus.clone()),
            provider: Arc::new(SimulatedSettlementProvider::new()),
            delivery: Arc::new(LoggingCodeDelivery),
        };
        (adapters, bus)
    }

    /// Swaps in the production backends named by `config`.
    ///
    /// A backend that is configured but not compiled in is reported and the
    /// current adapter is kept.
    #[allow(unused_mut)]
    pub async fn with_configured_backends(mut self, config: &GatewayConfig) -> Result<Self> {
        if let Some(db_path) = &config.storage.db_path {
            #[cfg(feature = "storage-rocksdb")]
            {
                let store = crate::infrastructure::rocksdb::RocksDbPaymentStore::open(db_path)?;
                tracing::info!(path = %db_path.display(), "Using RocksDB payment store");
                self.store = Arc::new(store);
            }
            #[cfg(not(feature = "storage-rocksdb"))]
            tracing::warn!(path = %db_path.display(), "storage.db_path set but storage-rocksdb is not enabled");
        }

        if let Some(redis) = &config.redis {
            #[cfg(feature = "lock-redis")]
            {
                let lock = crate::infrastructure::redis::RedisDistributedLock::new(&redis.url).await?;
                self.lock = Arc::new(lock);
            }
            #[cfg(not(feature = "lock-redis"))]
            tracing::warn!(url = %redis.url, "redis.url set but lock-redis is not enabled");
        }

        if let Some(kafka) = &config.kafka {
            #[cfg(feature = "bus-kafka")]
            {
                let bus = crate::infrastructure::kafka::KafkaEventBus::new(
                    kafka.bootstrap_servers.clone(),
                )?;
                self.bus = Arc::new(bus);
            }
            #[cfg(not(feature = "bus-kafka"))]
            tracing::warn!(
                bootstrap_servers = %kafka.bootstrap_servers,
                "kafka.bootstrap_servers set but bus-kafka is not enabled"
            );
        }

        Ok(self)
    }
}

/// The wired pipeline: the request-facing service and the order consumer.
pub struct Gateway {
    pub service: PaymentService,
    pub ingestion: OrderIngestionConsumer,
}

impl Gateway {
    /// Must be called inside a tokio runtime; settlement workers are spawned
    /// immediately.
    pub fn new(config: &GatewayConfig, adapters: Adapters) -> Self {
        let publisher = EventPublisher::new(adapters.bus.clone(), config.topics.clone());

        let otp = OtpCoordinator::new(
            adapters.store.clone(),
            adapters.lock.clone(),
            publisher.clone(),
            adapters.delivery,
            config.otp.clone(),
        );
        let executor = SettlementExecutor::new(adapters.provider);
        let pool = SettlementPool::new(
            config.settlement.workers,
            config.settlement.queue_capacity,
        );

        let service = PaymentService::new(
            adapters.store.clone(),
            adapters.lock,
            publisher.clone(),
            otp,
            executor,
            pool,
            config.checkout.clone(),
            config.settlement.clone(),
        );

        let ingestion = OrderIngestionConsumer::new(
            adapters.bus,
            adapters.store,
            publisher,
            config.topics.order_created.clone(),
            config.checkout.clone(),
            config.consumer.clone(),
        );

        Self { service, ingestion }
    }
}
