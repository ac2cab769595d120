use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vitals_metrics::{
    MetricsConfig, Telemetry,
    router::{health_router, with_metrics},
};

#[derive(Parser)]
#[command(name = "vitals", about = "HTTP service with Prometheus telemetry")]
struct Cli {
    #[arg(long, env = "VITALS_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "VITALS_PORT", default_value = "8000")]
    port: u16,

    #[arg(
        long,
        env = "VITALS_METRICS_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    metrics_enabled: bool,

    #[arg(long, env = "VITALS_SAMPLER_INTERVAL_SECS", default_value = "5")]
    sampler_interval_secs: u64,
}

impl Cli {
    fn metrics_config(&self) -> vitals_common::Result<MetricsConfig> {
        MetricsConfig::new(
            self.metrics_enabled,
            Duration::from_secs(self.sampler_interval_secs),
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("vitals=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);
    let config = cli.metrics_config()?;

    let telemetry = Telemetry::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let sampler = match &telemetry {
        Some(telemetry) => Some(telemetry.spawn_sampler(config.sampler_interval, shutdown.clone())),
        None => {
            info!("metrics disabled");
            None
        }
    };

    let app = with_metrics(Router::new().merge(health_router()), telemetry)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("vitals server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(sampler) = sampler {
        if let Err(err) = sampler.await {
            warn!(error = %err, "system metrics sampler exited abnormally");
        }
    }
    info!("vitals server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::Cli;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "vitals",
            "--port",
            "9100",
            "--metrics-enabled",
            "false",
            "--sampler-interval-secs",
            "2",
        ])
        .unwrap();

        let config = cli.metrics_config().unwrap();
        assert_eq!(cli.port, 9100);
        assert!(!config.enabled);
        assert_eq!(config.sampler_interval, Duration::from_secs(2));
    }

    #[test]
    fn zero_interval_fails_fast() {
        let cli = Cli::try_parse_from(["vitals", "--sampler-interval-secs", "0"]).unwrap();
        assert!(cli.metrics_config().is_err());
    }
}
