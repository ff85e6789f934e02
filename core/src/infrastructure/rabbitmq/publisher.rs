use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{
    common::CoreError,
    outbox::ports::{BrokerClient, DeliveryResult, OutboundMessage},
};

pub const DEDUPLICATION_HEADER: &str = "x-deduplication-key";
pub const PARTITION_HEADER: &str = "x-partition-key";

/// RabbitMQ broker client. Topics map to routing keys on a single durable
/// topic exchange; the channel runs in publisher-confirm mode so a publish
/// only succeeds once the broker acknowledged it.
///
/// Clones share one connection. Reconnects are serialized so concurrent
/// publishers that notice a dead connection open a single replacement.
#[derive(Clone)]
pub struct RabbitMqPublisher {
    connection: Arc<RwLock<Option<Connection>>>,
    channel: Arc<RwLock<Option<Channel>>>,
    reconnect: Arc<Mutex<()>>,
    connections_opened: Arc<AtomicU64>,
    url: String,
    exchange: String,
}

impl RabbitMqPublisher {
    pub fn new(url: String, exchange: String) -> Self {
        Self {
            connection: Arc::new(RwLock::new(None)),
            channel: Arc::new(RwLock::new(None)),
            reconnect: Arc::new(Mutex::new(())),
            connections_opened: Arc::new(AtomicU64::new(0)),
            url,
            exchange,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Connections opened over the publisher's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Connect to RabbitMQ and open a confirm-mode channel, closing any
    /// connection this publisher held before.
    pub async fn connect(&self) -> Result<(), CoreError> {
        info!(exchange = %self.exchange, "Connecting to RabbitMQ");

        let conn = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| {
                CoreError::ServiceUnavailable(format!("Failed to connect to RabbitMQ: {}", e))
            })?;

        let channel = conn.create_channel().await.map_err(|e| {
            CoreError::ServiceUnavailable(format!("Failed to create channel: {}", e))
        })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                CoreError::ServiceUnavailable(format!("Failed to enable publisher confirms: {}", e))
            })?;

        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        *self.channel.write().await = Some(channel);
        let stale = self.connection.write().await.replace(conn);
        if let Some(stale) = stale.filter(|stale| stale.status().connected())
            && let Err(e) = stale.close(0, "Replaced by reconnect").await
        {
            warn!(error = %e, "Failed to close replaced RabbitMQ connection");
        }

        info!("Successfully connected to RabbitMQ");
        Ok(())
    }

    /// Declare the topic exchange if it does not exist yet
    pub async fn declare_exchange(&self) -> Result<(), CoreError> {
        let channel = self.channel().await?;

        channel
            .exchange_declare(
                self.exchange.as_str(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                CoreError::ServiceUnavailable(format!(
                    "Failed to declare exchange {}: {}",
                    self.exchange, e
                ))
            })?;

        info!(exchange = %self.exchange, "Declared exchange");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.read().await;
        if let Some(conn) = conn_guard.as_ref() {
            conn.status().connected()
        } else {
            false
        }
    }

    /// Reconnect if connection is lost. Callers that lose the race for the
    /// reconnect lock find the connection already replaced.
    pub async fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.is_connected().await {
            return Ok(());
        }

        let _reconnecting = self.reconnect.lock().await;
        if self.is_connected().await {
            return Ok(());
        }

        warn!("RabbitMQ connection lost. Reconnecting...");
        self.connect().await?;
        self.declare_exchange().await
    }

    pub async fn close(&self) -> Result<(), CoreError> {
        let _reconnecting = self.reconnect.lock().await;
        let mut conn_guard = self.connection.write().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0, "Normal shutdown").await.map_err(|e| {
                CoreError::ServiceUnavailable(format!("Failed to close connection: {}", e))
            })?;
            info!("RabbitMQ connection closed");
        }
        self.channel.write().await.take();
        Ok(())
    }

    async fn channel(&self) -> Result<Channel, CoreError> {
        self.channel
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                CoreError::ServiceUnavailable(
                    "Channel not initialized. Call connect() first.".to_string(),
                )
            })
    }
}

fn message_properties(message: &OutboundMessage) -> BasicProperties {
    let dedup_key = message.dedup_key.to_string();

    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(DEDUPLICATION_HEADER),
        AMQPValue::LongString(LongString::from(dedup_key.clone())),
    );
    headers.insert(
        ShortString::from(PARTITION_HEADER),
        AMQPValue::LongString(LongString::from(message.key.clone())),
    );

    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2) // persistent
        .with_message_id(dedup_key.into())
        .with_headers(headers)
}

impl BrokerClient for RabbitMqPublisher {
    async fn publish(&self, message: OutboundMessage) -> DeliveryResult {
        self.ensure_connected()
            .await
            .map_err(|e| CoreError::transient(e.to_string()))?;
        let channel = self
            .channel()
            .await
            .map_err(|e| CoreError::transient(e.to_string()))?;

        let confirmation = channel
            .basic_publish(
                self.exchange.as_str(),
                message.topic.as_str(),
                BasicPublishOptions::default(),
                &message.payload,
                message_properties(&message),
            )
            .await
            .map_err(|e| {
                CoreError::transient(format!(
                    "Failed to publish message to {}/{}: {}",
                    self.exchange, message.topic, e
                ))
            })?
            .await
            .map_err(|e| {
                CoreError::transient(format!(
                    "Failed to confirm publish to {}/{}: {}",
                    self.exchange, message.topic, e
                ))
            })?;

        if confirmation.is_nack() {
            return Err(CoreError::transient(format!(
                "Broker rejected message {} for {}/{}",
                message.dedup_key, self.exchange, message.topic
            )));
        }

        debug!(
            exchange = %self.exchange,
            routing_key = %message.topic,
            dedup_key = %message.dedup_key,
            "Published message"
        );
        Ok(())
    }
}
