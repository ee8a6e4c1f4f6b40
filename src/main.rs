use clap::Parser;
use portcullis::{start, ControllerConfig, LoggingSink, LoggingStatusWriter};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

#[derive(Parser, Debug)]
#[command(name = "portcullis", about = "Gateway API control plane for an NGINX data plane")]
struct Args {
    /// GatewayClass controller name this instance claims
    #[arg(long = "gateway-class")]
    gateway_class: Option<String>,
}

fn init_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "portcullis.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let file_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()),
    );
    let stdout_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()),
    );

    Registry::default()
        .with(
            fmt::layer()
                .with_writer(non_blocking_appender)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(fmt::layer().with_filter(stdout_filter))
        .init();
    guard
}

#[tokio::main]
async fn main() -> portcullis::Result<()> {
    let args = Args::parse();
    let _guard = init_logging();

    let Some(gateway_class) = args.gateway_class.filter(|name| !name.is_empty()) else {
        error!("--gateway-class is required and must not be empty");
        std::process::exit(1);
    };

    let config = ControllerConfig::builder().gateway_class(gateway_class).build();
    start(config, LoggingSink, LoggingStatusWriter).await
}
