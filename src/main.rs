use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use telemetry_mq::config::{create_default_config_file, CONFIG_FILE_NAME};
use telemetry_mq::logging::init_tracing;
use telemetry_mq::persist::TraceRecord;
use telemetry_mq::{
    AmqpConnector, Connector, Envelope, MemoryStore, MessagingConfig, PersistHandler, Publisher,
    SeverityLevel, Subscriber, TraceMessage,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => run().await,
        Some("init") => {
            let path = args
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            create_default_config_file(&path)?;
            println!("Configuration file created at: {}", path.display());
            println!("Review connection_string before pointing the service at a real broker.");
            Ok(())
        }
        Some(other) => bail!("Unknown command {:?}. Usage: telemetry_mq [init [path]]", other),
    }
}

async fn run() -> Result<()> {
    let config = MessagingConfig::load_or_default()?;
    let params = config.connection_params()?;
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new());

    let store = Arc::new(MemoryStore::<TraceRecord>::new());
    let handler = PersistHandler::<TraceMessage, _>::shared(Arc::clone(&store));
    let mut subscriber = Subscriber::<TraceMessage, _>::new(
        params.clone(),
        Arc::clone(&connector),
        config.subscriber_config(),
        handler,
    )?;
    subscriber
        .subscribe()
        .await
        .with_context(|| format!("Failed to subscribe to queue {}", config.subscriber.queue))?;

    let publisher = Publisher::new(params, connector, config.publisher_config())?;
    let mut boot =
        TraceMessage::new("boot", SeverityLevel::Information).with_category("telemetry_mq");
    publisher.publish(&mut boot).await.context("Failed to publish boot trace")?;
    info!(message_id = %boot.id(), "Published boot trace, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    let delivered = subscriber.metrics();
    let persisted = subscriber.handler().metrics();
    info!(
        received = delivered.received,
        decode_failures = delivered.decode_failures,
        persisted = persisted.persisted,
        dropped = persisted.dropped,
        stored = store.committed_len(),
        "Shutting down"
    );

    publisher.close().await?;
    subscriber.unsubscribe().await?;
    Ok(())
}
