//! `error-insights` service binary: Kafka consumer feeding MongoDB and
//! Elasticsearch, with the Redis-backed query cache.

use std::process::ExitCode;
use std::sync::Arc;

use error_insights::ingest::{
    load_events_file, seed_events, ConsumerState, KafkaEventPublisher, KafkaEventStream,
};
use error_insights::{ServiceConfig, ServiceContext};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error-insights: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_json);

    let context = match ServiceContext::connect(&config).await {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let kafka = config.kafka();

    if let Some(path) = config.seed_file.as_deref() {
        let seeded = async {
            let events = load_events_file(path).await?;
            let publisher = KafkaEventPublisher::connect(&kafka)?;
            seed_events(context.records().as_ref(), &publisher, &events).await
        };
        match seeded.await {
            Ok(outcome) => info!(?outcome, "Seeding finished"),
            Err(e) => warn!(error = %e, "Seeding failed, continuing without seed data"),
        }
    }

    let stream = match KafkaEventStream::connect(&kafka) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to start Kafka consumer");
            context.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    let handle = context.spawn_consumer(Arc::new(stream));

    let mut consumer_state = handle.state_receiver();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            handle.stop();
        }
        _ = consumer_state.wait_for(|s| *s == ConsumerState::Terminated) => {}
    }
    let termination = handle.wait().await;

    context.shutdown().await;

    if termination.is_fatal() {
        error!(termination = %termination, "Consumer terminated abnormally");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
