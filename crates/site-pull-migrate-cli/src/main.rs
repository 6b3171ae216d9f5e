//! site-pull-migrate CLI - serve a site to a remote puller over HTTP.

use clap::{Parser, Subcommand};
use site_pull_migrate::{server, Config, MigrateError, ServeContext, TrackingStore};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "site-pull-migrate")]
#[command(about = "Resumable pull-transfer site migration over stateless HTTP")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the serve endpoint
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Validate the configuration and tracking-store connectivity
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Serve { bind } => {
            let ctx = ServeContext::connect(config).await?;
            let cancel_token = setup_signal_handler();

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Serving on {bind}");

            axum::serve(listener, server::router(ctx))
                .with_graceful_shutdown(async move { cancel_token.cancelled().await })
                .await?;

            info!("Shut down cleanly");
        }

        Commands::Check => {
            println!("Configuration OK (hash {})", config.hash());
            println!("  Site root: {}", config.site.root.display());
            println!(
                "  Database:  {}@{}:{}/{}",
                config.database.user,
                config.database.host,
                config.database.port,
                config.database.database
            );

            let ctx = ServeContext::connect(config).await?;
            let files = ctx.store.count_files().await?;
            let tables = ctx.store.count_tables().await?;
            println!("Tracking store reachable");
            println!("  Recorded file units:  {files}");
            println!("  Recorded table units: {tables}");
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Shutting down gracefully...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Shutting down gracefully...");
        token_term.cancel();
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    cancel_token
}
