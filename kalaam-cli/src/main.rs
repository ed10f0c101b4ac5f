mod cli;
mod commands;
mod player;

use crate::cli::{Cli, Command};
use crate::commands::Context;
use clap::Parser;
use kalaam_core::{CoreError, KalaamConfig, LibraryStore, API_KEY_ENV};
use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(KalaamConfig::config_path);

    // Check config for logging.enabled before full config load
    init_tracing(check_file_logging_enabled(&config_path));

    let config = match KalaamConfig::load_or_create_at(&config_path) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            // First run: keep going with defaults so library commands work
            warn!("Created config template at {}", path.display());
            let mut config = KalaamConfig::default();
            config.apply_env_overrides(std::env::var(API_KEY_ENV).ok());
            config
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl+C stops a recitation instead of killing the process mid-write
    let cancel_token = CancellationToken::new();
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, stopping...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    match runtime.block_on(run(cli, config, cancel_token)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: KalaamConfig, cancel: CancellationToken) -> Result<(), CoreError> {
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.storage.database_path());
    let store = Arc::new(LibraryStore::open(&db_path).await?);

    let ctx = Context {
        config,
        store: Arc::clone(&store),
        user_email: cli.user,
        cancel,
    };

    let result = dispatch(&ctx, cli.command).await;

    if let Err(e) = store.checkpoint().await {
        warn!("Failed to checkpoint library database: {e}");
    }
    result
}

async fn dispatch(ctx: &Context, command: Command) -> Result<(), CoreError> {
    match command {
        Command::Register(args) => commands::register(ctx, args).await,
        Command::Login => commands::login(ctx).await,
        Command::Categories => commands::categories(ctx).await,
        Command::Subcategories { category } => {
            commands::sub_categories(ctx, category.as_deref()).await
        }
        Command::Lyrics { sub_category } => commands::lyrics(ctx, sub_category.as_deref()).await,
        Command::Show { id } => commands::show(ctx, &id).await,
        Command::Search { query, favorites } => commands::search(ctx, &query, favorites).await,
        Command::Favorite { id } => commands::favorite(ctx, &id).await,
        Command::AddCategory { name } => commands::add_category(ctx, &name).await,
        Command::AddSubCategory { category, name } => {
            commands::add_sub_category(ctx, &category, &name).await
        }
        Command::AddLyric(args) => commands::add_lyric(ctx, args).await,
        Command::Settings { action } => commands::settings(ctx, action).await,
        Command::Explain { id } => commands::explain(ctx, &id).await,
        Command::Play { id, save } => commands::play(ctx, &id, save.as_deref()).await,
        Command::Admin { action } => commands::admin(ctx, action).await,
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled(config_path: &Path) -> bool {
    // Minimal structs to parse just the logging.enabled field
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(config_path) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with stderr output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest_retry=warn,symphonia=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = kalaam_core::paths::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
