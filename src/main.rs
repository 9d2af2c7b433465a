use std::process::ExitCode;
use std::sync::Arc;

use dropzone::consumer::{Consumer, ConsumerConfig, DispatchError};
use dropzone::producer::{AtomicProducer, ProducerConfig};
use dropzone::types::Message;
use dropzone::worker::{PollConfig, spawn_pollers};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropzone=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dropzone failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let consumer_config = ConsumerConfig::from_env()?;
    let poll_config = PollConfig::from_env()?;
    let producer = ProducerConfig::from_env()?.map(AtomicProducer::new);

    let listener = move |mut message: Message| -> Result<(), DispatchError> {
        match &producer {
            Some(producer) => {
                producer.produce(&mut message)?;
            }
            None => info!(%message, "Received message"),
        }
        Ok(())
    };

    let consumer = Arc::new(Consumer::new(consumer_config, listener)?);
    consumer.initialize()?;
    consumer.start()?;

    let shutdown = CancellationToken::new();
    let handles = spawn_pollers(Arc::clone(&consumer), &poll_config, &shutdown)?;
    info!(directory = %consumer.directory().display(), "dropzone running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();

    let mut total = 0;
    for handle in handles {
        total += handle.await?;
    }

    let stopping = Arc::clone(&consumer);
    tokio::task::spawn_blocking(move || stopping.stop()).await??;
    info!(total, "dropzone stopped");
    Ok(())
}
