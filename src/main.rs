use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use firetap_core::config::{MonitorConfig, TraceFilter, DEFAULT_BROKER_URL};
use firetap_server::server::ServerConfig;
use firetap_source::amqp::AmqpTraceConsumer;

/// Live broker firehose viewer: one upstream trace subscription, fanned out
/// to every connected WebSocket client.
#[derive(Debug, Parser)]
#[command(name = "firetap", version, about)]
struct Args {
    /// AMQP connection URL.
    #[arg(long, default_value = DEFAULT_BROKER_URL)]
    url: String,

    /// Port the WebSocket/HTTP server listens on.
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Trace filter: all, publish, deliver, exchange:<name>, or queue:<name>.
    #[arg(long, default_value = "all")]
    filter: TraceFilter,

    /// Seconds to keep the trace subscription alive after the last viewer
    /// disconnects.
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let monitor = MonitorConfig {
        broker_url: args.url.clone(),
        filter: args.filter.clone(),
        grace_period: Duration::from_secs(args.grace_secs),
    };
    let source = Arc::new(AmqpTraceConsumer::new(&args.url));

    tracing::info!(filter = %monitor.filter, grace_secs = args.grace_secs, "starting firetap");

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = firetap_server::start(config, monitor, source).await?;
    tracing::info!(port = handle.port, "firetap ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
