use std::backtrace::Backtrace;

use clap::Parser;
use tracing::error;

use classify_server::{load_model, run_server, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.default_log_filter().into()),
        )
        .init();

    let model = match load_model(&args.model_options()) {
        Ok(model) => model,
        Err(e) => {
            error!(error = %e, "Error loading model");
            error!("Diagnostic: {:?}", anyhow::Error::new(e));
            error!("Traceback:\n{}", Backtrace::force_capture());
            error!("Failed to load model. Exiting...");
            std::process::exit(1);
        }
    };

    run_server(args.server_config(), model).await
}
