use clap::Parser;
use cli::Args;
use ethp_core::Supervisor;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = args.as_config()?;

    let supervisor = match Supervisor::start(config).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!("pipeline failed to start: {err}");
            return Err(err);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            supervisor.shutdown();
        }
        _ = supervisor.wait_for_shutdown() => {}
    }

    Ok(())
}
