use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sos_coach::{
    cli::{load_catalog, seed_catalog, Cli, Command},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    prompts::{INTERVENTION_RANKER_PROMPT, SOS_RESPONSE_PROMPT},
    server::{AppState, RpcServer},
    storage::SqliteStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "SOS coach starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command() {
        Command::Seed { catalog } => {
            let catalog = load_catalog(&catalog)?;
            let summary = seed_catalog(storage.as_ref(), catalog).await?;
            info!(%summary, "Seed complete");
            println!("{}", summary);
            Ok(())
        }
        Command::Serve => serve(config, storage).await,
    }
}

async fn serve(config: Config, storage: Arc<SqliteStorage>) -> anyhow::Result<()> {
    // Initialize Langbase client
    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    // Ensure required pipes exist (create if needed)
    info!("Ensuring required Langbase pipes exist...");
    if let Err(e) = langbase
        .ensure_pipe(
            &config.pipes.response,
            "Phrases SOS coach replies",
            SOS_RESPONSE_PROMPT,
            true,
        )
        .await
    {
        error!(error = %e, "Failed to ensure response pipe exists");
        return Err(e.into());
    }
    if let Err(e) = langbase
        .ensure_pipe(
            &config.pipes.ranker,
            "Ranks coach interventions for an SOS moment",
            INTERVENTION_RANKER_PROMPT,
            true,
        )
        .await
    {
        error!(error = %e, "Failed to ensure ranker pipe exists");
        return Err(e.into());
    }

    let state = Arc::new(AppState::with_langbase(config, storage, langbase));

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = RpcServer::serve_stdio(state).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
