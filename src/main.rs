use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use eatsd::cli::{self, ApiClient, ListOptions, OutputFormat, ServerTarget};
use eatsd::config::Settings;
use eatsd::DEFAULT_SERVER_URL;

#[derive(Parser)]
#[command(name = "eatsd")]
#[command(about = "Uber Eats webhook ingestion service", version)]
struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Server URL for management commands
    #[arg(long, global = true, env = "EATSD_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Admin API key for management commands
    #[arg(long, global = true, env = "EATSD_ADMIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Database file path (overrides EATSD_DATABASE)
        #[arg(long)]
        db: Option<String>,
        /// Public server URL (overrides EATSD_PUBLIC_URL)
        #[arg(long)]
        url: Option<String>,
    },
    /// Check that a server is up
    Health,
    /// Inspect and retry stored events
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Inject a synthetic event on a sandbox server
    Test {
        /// Event type, e.g. "orders.notification"
        event_type: String,
        /// Store the synthetic event belongs to
        #[arg(long)]
        store: Option<String>,
    },
    /// Print the signature headers for a payload file
    Sign {
        /// JSON payload file
        file: PathBuf,
        /// Webhook secret
        #[arg(long, env = "UBER_EATS_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
        /// Unix timestamp to sign with (default: now)
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Sign a payload file and deliver it to a webhook endpoint
    Send {
        /// JSON payload file
        file: PathBuf,
        /// Webhook secret
        #[arg(long, env = "UBER_EATS_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
        /// Endpoint (default: <server>/v1/webhooks)
        #[arg(long)]
        url: Option<String>,
    },
    /// Generate a random webhook secret
    Secret,
}

#[derive(Subcommand)]
enum EventsAction {
    /// List stored events
    List {
        /// Filter by event type
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Filter by status (PENDING, PROCESSING, PROCESSED, FAILED)
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Show one event by row id or Uber event id
    Show { id: String },
    /// Process a failed event again
    Retry { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("eatsd=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let target = ServerTarget {
        url: cli.server,
        api_key: cli.api_key,
    };

    match cli.command {
        Commands::Serve { port, db, url } => {
            let mut settings = Settings::from_env();
            if let Some(db) = db {
                settings.database_path = db;
            }
            if let Some(url) = url {
                settings.public_url = url;
            }
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            eatsd::server::run_server(addr, settings).await?;
        }
        Commands::Health => {
            cli::run_health(&ApiClient::new(target)?, format).await?;
        }
        Commands::Events { action } => {
            let api = ApiClient::new(target)?;
            match action {
                EventsAction::List {
                    event_type,
                    status,
                    limit,
                    offset,
                } => {
                    let options = ListOptions {
                        event_type: event_type.as_deref(),
                        status: status.as_deref(),
                        limit,
                        offset,
                    };
                    cli::run_events_list(&api, &options, format).await?;
                }
                EventsAction::Show { id } => {
                    cli::run_events_show(&api, &id, format).await?;
                }
                EventsAction::Retry { id } => {
                    cli::run_events_retry(&api, &id, format).await?;
                }
            }
        }
        Commands::Test { event_type, store } => {
            let api = ApiClient::new(target)?;
            cli::run_sandbox_event(&api, &event_type, store.as_deref(), format).await?;
        }
        Commands::Sign {
            file,
            secret,
            timestamp,
        } => {
            cli::run_sign(&secret, timestamp.as_deref(), &file, format)?;
        }
        Commands::Send { file, secret, url } => {
            let url = url.unwrap_or_else(|| {
                format!(
                    "{}/{}/webhooks",
                    target.url.trim_end_matches('/'),
                    eatsd::API_VERSION
                )
            });
            cli::run_send(&url, &secret, &file, format).await?;
        }
        Commands::Secret => {
            cli::run_secret(format)?;
        }
    }

    Ok(())
}
