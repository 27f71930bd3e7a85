use anyhow::{Context, Result, anyhow};
use bkpanel::client::PanelClient;
use bkpanel::config::AppConfig;
use bkpanel::context::AppContext;
use bkpanel::core::{BackupJob, BackupOption, progress::new_token};
use bkpanel::logging::{self, LogConfig};
use bkpanel::web::WebServer;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bkpanel")]
#[command(about = "Control panel for application backups", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Panel URL for client commands (defaults to the configured bind address)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Bearer token for client commands
    #[arg(long, global = true)]
    api_token: Option<String>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and queue workers
    Serve,
    /// Execute one backup job in this process
    Run {
        #[arg(long)]
        option: Option<String>,
        /// Progress key to report under (minted when omitted)
        #[arg(long)]
        token: Option<String>,
    },
    /// Show progress of a backup
    Status { token: String },
    /// Ask the server to start a backup
    Backup {
        #[arg(long)]
        option: Option<String>,
    },
    /// List backups on every destination disk
    List,
    Delete { disk: String, path: String },
    Download {
        disk: String,
        path: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Remove old backups with the clean command
    Clean,
    Diagnostics,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    http_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    data_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    log_json: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::new(Some(&cli.overrides), cli.config.as_deref())?;
    logging::init(LogConfig::from(&config));

    match &cli.command {
        Commands::Serve => run_server(config).await.context("Failed to run server")?,
        Commands::Run { option, token } => {
            run_job(config, parse_option(option.as_deref())?, token.clone()).await?
        }
        Commands::Config => print!("{}", config.to_toml()?),
        command => run_client(&cli, &config, command).await?,
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    let bind = config.http_bind;
    let ctx = AppContext::new(config).await?;
    let dispatcher = ctx.dispatcher.clone();
    let server = Arc::new(WebServer::new(ctx, bind));

    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down, draining queued backups");
            server.shutdown();
        }
        result = &mut serving => {
            dispatcher.shutdown().await;
            return result.context("Server task panicked")?;
        }
    }

    serving.await.context("Server task panicked")??;
    dispatcher.shutdown().await;
    Ok(())
}

/// Run a job here, writing progress to the shared store for other processes to poll.
async fn run_job(config: AppConfig, option: BackupOption, token: Option<String>) -> Result<()> {
    let ctx = AppContext::new(config).await?;
    let token = token.unwrap_or_else(new_token);
    println!("progress_key: {}", token);

    let outcome = ctx
        .dispatcher
        .runner()
        .run(BackupJob::new(token, option))
        .await?;
    println!("{} ({} attempt(s))", outcome.message, outcome.attempts);
    Ok(())
}

async fn run_client(cli: &Cli, config: &AppConfig, command: &Commands) -> Result<()> {
    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| format!("http://{}", config.http_bind));
    let token = cli
        .api_token
        .clone()
        .or_else(|| config.auth.tokens.first().cloned());
    let client = PanelClient::new(url, token);

    match command {
        Commands::Status { token } => print_json(&client.status(token).await?)?,
        Commands::Backup { option } => {
            let option = parse_option(option.as_deref())?;
            print_json(&client.create_backup(option).await?)?
        }
        Commands::List => print_json(&client.destinations().await?)?,
        Commands::Delete { disk, path } => print_json(&client.delete(disk, path).await?)?,
        Commands::Download { disk, path, out } => {
            let out = out
                .clone()
                .unwrap_or_else(|| PathBuf::from(bkpanel::core::storage::basename(path)));
            let bytes = client.download(disk, path, &out).await?;
            println!("Saved {} ({} bytes)", out.display(), bytes);
        }
        Commands::Clean => print_json(&client.clean().await?)?,
        Commands::Diagnostics => print_json(&client.diagnostics().await?)?,
        Commands::Serve | Commands::Run { .. } | Commands::Config => {
            anyhow::bail!("Not a client command")
        }
    }

    Ok(())
}

fn parse_option(value: Option<&str>) -> Result<BackupOption> {
    BackupOption::parse(value).ok_or_else(|| {
        anyhow!(
            "Invalid backup option '{}' (expected only-db or only-files)",
            value.unwrap_or_default()
        )
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
