//! # Exception Worker Entrypoint
//!
//! Single binary for all seven worker types, selected at startup by
//! `WORKER_TYPE`. There is deliberately no `--worker-type` flag: the
//! worker's identity always comes from configuration, matching the
//! `WORKER_TYPE=... exception-worker` invocation shape the deployment
//! tooling expects. A handful of `clap` flags override port/concurrency/
//! log-level for local debugging only.

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::{Arg, Command};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_substrate::broker::{Broker, MessageHandler};
use event_substrate::config::Config;
use event_substrate::health::{self, HealthServerState};
use event_substrate::metrics::Metrics;
use event_substrate::processors;
use event_substrate::publisher::EventPublisher;
use event_substrate::rate_limiter::{PerTenantRateLimiter, TenantRateLimit};
use event_substrate::retry_policy::RetryPolicyRegistry;
use event_substrate::retry_scheduler::RetryScheduler;
use event_substrate::storage::EventStore;
use event_substrate::types::WorkerType;
use event_substrate::worker::WorkerRuntime;
use event_substrate::{SERVICE_NAME, VERSION};

#[cfg(feature = "kafka")]
use event_substrate::kafka::KafkaBroker;

#[tokio::main]
async fn main() {
    init_logging();
    setup_panic_hook();

    if let Err(e) = dotenv() {
        warn!("failed to load .env file: {}", e);
    }

    let matches = create_cli().get_matches();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    apply_cli_overrides(&mut config, &matches);

    if let Err(e) = config.validate() {
        error!("configuration validation failed: {}", e);
        process::exit(1);
    }

    if matches.get_flag("validate-config") {
        info!("configuration is valid");
        process::exit(0);
    }

    info!("starting {} version {}", SERVICE_NAME, VERSION);
    info!(worker_type = %config.worker.worker_type, "worker identity resolved");

    if let Err(e) = run(config).await {
        error!("worker exited with error: {}", e);
        process::exit(1);
    }
}

async fn run(config: Config) -> event_substrate::Result<()> {
    let worker_type = WorkerType::parse(&config.worker.worker_type)
        .expect("validated config guarantees a known worker type");
    let group_id = config.effective_group_id();
    let health_port = config.health_port();

    let store = Arc::new(EventStore::connect(&config.storage).await?);
    let broker: Arc<dyn Broker> = build_broker(&config)?;
    let rate_limiter = Arc::new(PerTenantRateLimiter::new(TenantRateLimit {
        events_per_second: config.rate_limit.events_per_second,
        events_per_minute: config.rate_limit.events_per_minute,
        burst_size: config.rate_limit.burst_size,
    }));
    let metrics = Arc::new(Metrics::new(config.worker.metrics_include_tenant_id)?);
    let topics = event_substrate::topic_naming::TopicNamingStrategy::new(
        event_substrate::topic_naming::TopicStrategy::Shared,
    );

    let publisher = Arc::new(EventPublisher::new(
        broker.clone(),
        store.clone(),
        rate_limiter,
        topics,
        metrics.clone(),
        config.worker.rate_limit_enabled,
    ));

    let retry_scheduler = Arc::new(RetryScheduler::new(
        store.clone(),
        publisher.clone(),
        RetryPolicyRegistry::default(),
        metrics.clone(),
    ));

    let processor = processors::build_processor(worker_type, publisher.clone());

    let worker = Arc::new(WorkerRuntime::new(
        worker_type.as_str(),
        processor,
        store,
        publisher,
        retry_scheduler,
        metrics,
        config.worker.allow_future_schema,
        None,
        config.worker.concurrency as usize,
    ));

    let health_state = HealthServerState {
        broker: broker.clone(),
        worker: worker.clone(),
        worker_type: worker_type.as_str().to_string(),
        group_id: group_id.clone(),
        concurrency: config.worker.concurrency,
        started_at: Instant::now(),
    };
    let health_host = config.server.host.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::serve(&health_host, health_port, health_state).await {
            error!("health server exited: {}", e);
        }
    });

    let topics = processors::topics_for_worker_type(worker_type);
    let consume_broker = broker.clone();
    let consume_worker = worker.clone() as Arc<dyn MessageHandler>;
    let consume_handle = tokio::spawn(async move {
        consume_broker.subscribe(&topics, &group_id, consume_worker).await
    });

    tokio::select! {
        result = consume_handle => {
            match result {
                Ok(Ok(())) => info!("consume loop exited"),
                Ok(Err(e)) => error!("consume loop failed: {}", e),
                Err(e) => error!("consume task panicked: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, draining in-flight work");
        }
    }

    worker.shutdown();
    health_handle.abort();
    broker.close().await?;
    info!("worker shutdown complete");
    Ok(())
}

#[cfg(feature = "kafka")]
fn build_broker(config: &Config) -> event_substrate::Result<Arc<dyn Broker>> {
    Ok(Arc::new(KafkaBroker::new(config.broker.clone())?))
}

#[cfg(not(feature = "kafka"))]
fn build_broker(_config: &Config) -> event_substrate::Result<Arc<dyn Broker>> {
    Ok(Arc::new(event_substrate::broker::InMemoryBroker::new()))
}

fn init_logging() {
    let log_level = env::var("RUST_LOG")
        .or_else(|_| env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let subscriber = tracing_subscriber::registry();

    match log_format.as_str() {
        "text" => {
            subscriber
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
        _ => {
            subscriber
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_span_list(true),
                )
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
    }
}

fn create_cli() -> Command {
    Command::new(SERVICE_NAME)
        .version(VERSION)
        .about("Worker process for the exception-processing event pipeline")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Override the health server port")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("concurrency")
                .short('w')
                .long("concurrency")
                .value_name("COUNT")
                .help("Override worker concurrency")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Override log level (error, warn, info, debug, trace)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("validate-config")
                .long("validate-config")
                .help("Validate configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) {
    if let Some(port) = matches.get_one::<String>("port").and_then(|p| p.parse().ok()) {
        config.server.health_port_override = Some(port);
    }
    if let Some(concurrency) = matches
        .get_one::<String>("concurrency")
        .and_then(|c| c.parse().ok())
    {
        config.worker.concurrency = concurrency;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        std::env::set_var("RUST_LOG", level);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
        info!("received SIGTERM");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic message".to_string()
        };
        error!("worker panicked at {}: {}\n{}", location, message, backtrace);
        process::exit(1);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_creation() {
        let cli = create_cli();
        assert_eq!(cli.get_name(), SERVICE_NAME);
    }

    #[test]
    fn test_cli_overrides_port_and_concurrency() {
        let cli = create_cli();
        let matches = cli.get_matches_from(["exception-worker", "--port", "19090", "--concurrency", "8"]);
        let mut config = Config::default();
        config.worker.worker_type = "intake".to_string();
        apply_cli_overrides(&mut config, &matches);
        assert_eq!(config.server.health_port_override, Some(19090));
        assert_eq!(config.worker.concurrency, 8);
    }

    #[test]
    fn test_panic_hook_setup() {
        setup_panic_hook();
    }
}
