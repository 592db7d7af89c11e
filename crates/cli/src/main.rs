//! Client for requesting hitspool data.

mod publisher_client;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hitspool_core::client::delete_json;
use hitspool_core::request::{current_username, generate_request_id};
use hitspool_core::ticks::parse_utc;
use hitspool_core::{HubSet, Prefix, Submission, TimeValue};
use publisher_client::PublisherClient;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hsrequest")]
#[command(about = "Request buffered hit data from the detector hubs")]
#[command(version, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    submit: SubmitArgs,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Start of the window: UTC `YYYY-MM-DD HH:MM:SS[.ffffff]` or ticks
    #[arg(short = 'b', long = "begin", required = true)]
    begin: Option<String>,

    /// End of the window, same forms as --begin
    #[arg(short = 'e', long = "end", required = true)]
    end: Option<String>,

    /// Destination directory, `[user@host:]/path`
    #[arg(short = 'd', long = "destination", required = true)]
    destination: Option<String>,

    /// Request ID (generated when omitted)
    #[arg(short = 'i', long = "request-id")]
    request_id: Option<String>,

    /// Requesting user (defaults to the login name)
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Cut the window out of the hit files instead of shipping whole files
    #[arg(long)]
    extract: bool,

    /// Only these hubs, e.g. `1-3,t5` or `ichub21`
    #[arg(long)]
    hubs: Option<String>,

    /// Request category: ANON, HESE, SNALERT or i3live
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct ConnectionArgs {
    /// Publisher `host:port` (overrides client config)
    #[arg(long, global = true)]
    publisher: Option<String>,

    /// Client config file path
    #[arg(long, global = true, env = "HSREQUEST_CONFIG")]
    client_config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Withdraw a request that has not been sent to the hubs yet
    Delete {
        /// ID of the request to withdraw
        request_id: String,

        /// Requesting user (defaults to the login name)
        #[arg(short = 'u', long)]
        username: Option<String>,
    },
}

/// Client configuration (`~/.config/hitspool/client.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClientConfig {
    #[serde(default = "default_publisher")]
    publisher: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_publisher() -> String {
    "localhost:55557".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            publisher: default_publisher(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli {
        command,
        submit,
        connection,
    } = Cli::parse();

    let config_path = client_config_path(connection.client_config.as_deref())?;
    let config = load_client_config(&config_path)?;
    let client = PublisherClient::new(
        connection.publisher.as_deref().unwrap_or(&config.publisher),
        Duration::from_secs(config.timeout_secs),
    );

    match command {
        Some(Commands::Delete { request_id, username }) => {
            handle_delete(&client, &request_id, username).await
        }
        None => handle_submit(&client, submit).await,
    }
}

async fn handle_submit(client: &PublisherClient, args: SubmitArgs) -> Result<()> {
    let submission = build_submission(args)?;
    let request_id = submission.request_id.clone().unwrap_or_default();
    let body = submission.to_json()?;
    tracing::debug!(%body, publisher = client.addr(), "submitting");

    if !client.send(&body).await? {
        anyhow::bail!("publisher rejected request {request_id}");
    }
    println!("Request {request_id} accepted by {}", client.addr());
    Ok(())
}

async fn handle_delete(client: &PublisherClient, request_id: &str, username: Option<String>) -> Result<()> {
    let username = username.unwrap_or_else(current_username);
    let body = delete_json(request_id, &username)?;

    if !client.send(&body).await? {
        anyhow::bail!("publisher rejected delete of {request_id}");
    }
    println!("Delete of request {request_id} sent to {}", client.addr());
    Ok(())
}

/// Check what can be checked locally and fill in the request ID and user.
///
/// Window checks are left to the Publisher.
fn build_submission(args: SubmitArgs) -> Result<Submission> {
    let begin = args.begin.context("missing --begin")?;
    let end = args.end.context("missing --end")?;
    let destination = args.destination.context("missing --destination")?;

    if let Some(prefix) = &args.prefix {
        prefix
            .parse::<Prefix>()
            .with_context(|| format!("invalid --prefix {prefix:?}"))?;
    }
    if let Some(hubs) = &args.hubs {
        HubSet::parse(hubs).with_context(|| format!("invalid --hubs {hubs:?}"))?;
    }

    Ok(Submission {
        start_time: Some(time_value(&begin).context("invalid --begin")?),
        stop_time: Some(time_value(&end).context("invalid --end")?),
        destination_dir: destination,
        prefix: args.prefix,
        request_id: Some(args.request_id.unwrap_or_else(generate_request_id)),
        username: Some(args.username.unwrap_or_else(current_username)),
        hubs: args.hubs,
        extract: args.extract,
    })
}

/// Integers are ticks; anything else must be a UTC date string.
fn time_value(raw: &str) -> Result<TimeValue> {
    let raw = raw.trim();
    if let Ok(ticks) = raw.parse::<i64>() {
        return Ok(TimeValue::Integer(ticks));
    }
    parse_utc(raw)?;
    Ok(TimeValue::Text(raw.to_string()))
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set HSREQUEST_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("hitspool").join("client.toml"))
}

fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("HSREQUEST_").ignore(&["config"]));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}
