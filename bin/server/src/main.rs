use imagik_server::{Server, ServerConfig};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration from environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if config.debug {
        "debug"
    } else {
        "info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        auth_driver = %config.auth_driver,
        root_dir = %config.root_dir.display(),
        "Loaded configuration"
    );

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(report) => {
            tracing::error!(error = %report, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(report) = server.run().await {
        tracing::error!(error = %report, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
