//! Runtime wiring from [`Settings`].
//!
//! | backend | queues | storage |
//! |---|---|---|
//! | memory | `InMemoryQueue` | in-memory repositories |
//! | redis / postgres | `RedisQueue` (feature `redis`) | Postgres repositories |
//!
//! Every stage gets its own main queue and a `<name>-poison` queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;

use courier_events::{InMemoryQueue, QueueSink, QueueSource, poison_queue_name};
use courier_infra::stages::{
    Inbound, Outbound, QueueForwarder, Registration, Validation, ValidationStage,
};
use courier_infra::storage::{
    EventRepository, InMemoryEventRepository, InMemorySubscriptionRepository,
    PostgresEventRepository, PostgresSubscriptionRepository, SubscriptionRepository,
    apply_schema,
};
use courier_infra::{
    ConsumerConfig, HttpWebhookSender, QueueBackend, QueueConsumer, QueueStage, RequeueEngine,
    RetryingStage, Settings, StorageBackend, WebhookConfig,
};

/// One stage's main queue (both ends) and its poison queue.
#[derive(Clone)]
pub struct StageQueue {
    pub source: Arc<dyn QueueSource>,
    pub sink: Arc<dyn QueueSink>,
    pub poison: Arc<dyn QueueSink>,
}

pub enum QueueFactory {
    Memory,
    #[cfg(feature = "redis")]
    Redis(redis::aio::MultiplexedConnection),
}

impl QueueFactory {
    pub async fn connect(backend: &QueueBackend) -> anyhow::Result<Self> {
        match backend {
            QueueBackend::Memory => Ok(Self::Memory),
            #[cfg(feature = "redis")]
            QueueBackend::Redis { url } => {
                let client = redis::Client::open(url.as_str()).context("invalid redis url")?;
                let conn = client
                    .get_multiplexed_tokio_connection()
                    .await
                    .context("failed to connect to redis")?;
                Ok(Self::Redis(conn))
            }
            #[cfg(not(feature = "redis"))]
            QueueBackend::Redis { .. } => {
                anyhow::bail!("redis queue backend requested but the worker was built without the `redis` feature")
            }
        }
    }

    pub fn open(&self, name: &str) -> StageQueue {
        let poison_name = poison_queue_name(name);
        match self {
            Self::Memory => {
                let main = Arc::new(InMemoryQueue::new(name));
                StageQueue {
                    source: main.clone(),
                    sink: main,
                    poison: Arc::new(InMemoryQueue::new(poison_name)),
                }
            }
            #[cfg(feature = "redis")]
            Self::Redis(conn) => {
                use courier_infra::redis_queue::RedisQueue;

                let main = Arc::new(RedisQueue::with_connection(conn.clone(), name));
                StageQueue {
                    source: main.clone(),
                    sink: main,
                    poison: Arc::new(RedisQueue::with_connection(conn.clone(), poison_name)),
                }
            }
        }
    }
}

pub struct Storage {
    pub events: Arc<dyn EventRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
}

impl Storage {
    pub async fn connect(backend: &StorageBackend) -> anyhow::Result<Self> {
        match backend {
            StorageBackend::Memory => {
                tracing::warn!("using in-memory storage; events and subscriptions are not persisted");
                Ok(Self {
                    events: Arc::new(InMemoryEventRepository::new()),
                    subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
                })
            }
            StorageBackend::Postgres { database_url } => {
                let pool = PgPool::connect(database_url)
                    .await
                    .context("failed to connect to postgres")?;
                apply_schema(&pool).await.context("failed to apply schema")?;

                Ok(Self {
                    events: Arc::new(PostgresEventRepository::new(pool.clone())),
                    subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool)),
                })
            }
        }
    }
}

/// Build one consumer per stage queue.
pub async fn build(settings: &Settings) -> anyhow::Result<Vec<QueueConsumer>> {
    let queues = QueueFactory::connect(&settings.queue_backend).await?;
    let storage = Storage::connect(&settings.storage).await?;
    assemble(settings, &queues, storage)
}

/// Wire stages over already-connected backends.
pub fn assemble(
    settings: &Settings,
    queues: &QueueFactory,
    storage: Storage,
) -> anyhow::Result<Vec<QueueConsumer>> {
    let webhook = Arc::new(
        HttpWebhookSender::new(WebhookConfig {
            timeout: settings.webhook_timeout,
            ..WebhookConfig::default()
        })
        .context("failed to build webhook client")?,
    );

    let registration_q = queues.open(&settings.queues.registration);
    let inbound_q = queues.open(&settings.queues.inbound);
    let outbound_q = queues.open(&settings.queues.outbound);
    let validation_q = queues.open(&settings.queues.validation);

    let config = ConsumerConfig {
        poll_interval: settings.poll_interval,
        // A lease must outlive the slowest webhook call plus storage work.
        lease: Duration::from_secs(5 * 60).max(settings.webhook_timeout * 4),
        max_native_dequeue_count: settings.max_native_dequeue_count,
    };

    let engine = |queue: &StageQueue| RequeueEngine::new(queue.sink.clone(), queue.poison.clone());

    let registration = RetryingStage::new(
        Registration::new(
            storage.events.clone(),
            Arc::new(QueueForwarder::new(inbound_q.sink.clone())),
        ),
        engine(&registration_q),
    );
    let inbound = RetryingStage::new(
        Inbound::new(
            storage.subscriptions.clone(),
            Arc::new(QueueForwarder::new(outbound_q.sink.clone())),
        ),
        engine(&inbound_q),
    );
    let outbound = RetryingStage::new(Outbound::new(webhook.clone()), engine(&outbound_q));
    let validation = ValidationStage::new(Validation::new(
        webhook,
        storage.subscriptions,
        settings.api_base_url.clone(),
    ));

    Ok(vec![
        consumer(&registration_q, Arc::new(registration), &config),
        consumer(&inbound_q, Arc::new(inbound), &config),
        consumer(&outbound_q, Arc::new(outbound), &config),
        consumer(&validation_q, Arc::new(validation), &config),
    ])
}

fn consumer(queue: &StageQueue, stage: Arc<dyn QueueStage>, config: &ConsumerConfig) -> QueueConsumer {
    QueueConsumer::new(queue.source.clone(), queue.poison.clone(), stage, config.clone())
}
