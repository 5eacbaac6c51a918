// src/connection.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::connection_string::ConnectionParams;
use crate::errors::{MessagingError, Result, TransportError};
use crate::transport::{BrokerChannel, BrokerConnection, Connector, TransportResult};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a transport call under a deadline, wrapping its failure into the given error kind.
pub(crate) async fn deadline<T>(
    operation: &'static str,
    limit: Duration,
    future: impl Future<Output = TransportResult<T>>,
    wrap: fn(TransportError) -> MessagingError,
) -> Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(wrap),
        Err(_) => Err(MessagingError::timeout(operation, limit)),
    }
}

/// Owns one broker connection and one channel on it.
///
/// Both are opened lazily on the first `get_channel` call and reused while
/// they stay open; a dead channel or connection is replaced on the next call.
pub struct ConnectionManager {
    params: ConnectionParams,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

impl ConnectionManager {
    pub fn new(params: ConnectionParams, connector: Arc<dyn Connector>) -> Self {
        ConnectionManager {
            params,
            connector,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection: None,
            channel: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        let connection_open = self.connection.as_ref().is_some_and(|conn| conn.is_open());
        let channel_open = self.channel.as_ref().is_some_and(|channel| channel.is_open());
        connection_open && channel_open
    }

    pub async fn get_channel(&mut self) -> Result<Arc<dyn BrokerChannel>> {
        if self.is_open() {
            if let Some(channel) = &self.channel {
                return Ok(Arc::clone(channel));
            }
        }

        if !self.connection.as_ref().is_some_and(|conn| conn.is_open()) {
            self.establish_connection().await?;
        }

        let connection = self.connection.as_ref().ok_or_else(|| {
            MessagingError::ConnectionError(TransportError::from("No active connection"))
        })?;
        let channel = deadline(
            "opening channel",
            self.connect_timeout,
            connection.create_channel(),
            MessagingError::ChannelError,
        )
        .await
        .inspect_err(|e| error!("Failed to open channel on {}: {}", self.params, e))?;

        info!("Channel opened on {}", self.params);
        self.channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn establish_connection(&mut self) -> Result<()> {
        // Whatever was left belongs to a dead connection.
        self.channel = None;
        self.connection = None;

        info!("Connecting to broker at {}", self.params);
        let connection = deadline(
            "opening connection",
            self.connect_timeout,
            self.connector.connect(&self.params),
            MessagingError::ConnectionError,
        )
        .await
        .inspect_err(|e| error!("Failed to connect to broker at {}: {}", self.params, e))?;

        info!("Connected to broker at {}", self.params);
        self.connection = Some(connection);
        Ok(())
    }

    /// Closes the channel, then the connection. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let channel = self.channel.take();
        let connection = self.connection.take();
        if channel.is_none() && connection.is_none() {
            debug!("Connection to {} already closed", self.params);
            return Ok(());
        }

        let mut first_error = None;

        if let Some(channel) = channel.filter(|channel| channel.is_open()) {
            if let Err(e) = channel.close().await {
                warn!("Failed to close channel: {}", e);
                first_error = Some(MessagingError::ChannelError(e));
            }
        }

        if let Some(connection) = connection.filter(|conn| conn.is_open()) {
            info!("Closing connection to {}", self.params);
            if let Err(e) = connection.close().await {
                warn!("Failed to close connection: {}", e);
                first_error.get_or_insert(MessagingError::ConnectionError(e));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
