// MediaCMS command-line client.
// Thin front end over the library: login, browse media, search and local history.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediacms_client::api::{LoginPayload, MediaListParams, SuggestionType};
use mediacms_client::storage::{FileStore, paths};
use mediacms_client::{ApiClient, ClientConfig, ClientError, RequestDescriptor};

#[derive(Parser)]
#[command(name = "mediacms")]
#[command(about = "Command-line client for the MediaCMS REST API", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "MEDIACMS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(short, long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "MEDIACMS_PASSWORD")]
        password: String,
        /// Keep the refresh token for later sessions
        #[arg(long)]
        remember: bool,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// GET any API path and print the JSON body
    Get {
        path: String,
        /// Query parameters as name=value
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Bypass the response cache
        #[arg(long)]
        fresh: bool,
    },
    /// List media or show one item
    Media {
        /// Friendly token of a single media item
        token: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        show: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Search suggestions for a query; the query is saved to local history
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Show or clear local search history
    History {
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediacms_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(paths::config_path);
    let mut config = ClientConfig::load(config_path.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let store = Arc::new(FileStore::open_default()?);
    let client = ApiClient::init(config, store)?;

    let outcome = run(&client, cli.command).await;
    client.teardown()?;

    if let Err(e) = outcome {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(client: &ApiClient, command: Commands) -> Result<(), ClientError> {
    match command {
        Commands::Login {
            username,
            password,
            remember,
        } => {
            let payload = LoginPayload {
                remember_me: remember,
                ..LoginPayload::with_username(username, password)
            };
            let res = client.login(&payload).await?;
            println!("Logged in as {}", res.username.as_deref().unwrap_or("user"));
        }
        Commands::Logout => {
            client.logout()?;
            println!("Logged out");
        }
        Commands::Whoami => print_json(&client.whoami().await?)?,
        Commands::Get {
            path,
            params,
            fresh,
        } => {
            let mut req = RequestDescriptor::get(path);
            for param in params {
                let (name, value) = param.split_once('=').unwrap_or((param.as_str(), ""));
                req = req.query(name, value);
            }
            if fresh {
                req = req.no_cache();
            }
            print_json(&client.request(req).await?)?;
        }
        Commands::Media {
            token: Some(token),
            ..
        } => print_json(&client.media(&token).await?)?,
        Commands::Media {
            token: None,
            page,
            show,
            author,
        } => {
            let params = MediaListParams { page, show, author };
            let page = client.list_media(&params).await?;
            println!("{} media", page.count);
            for item in page.results {
                println!("{:<14} {}", item.friendly_token, item.title);
            }
        }
        Commands::Search { query, limit } => {
            client.history().add(&query)?;
            let suggestions = client
                .search_suggestions(&query, limit, SuggestionType::Popular)
                .await?;
            for suggestion in suggestions {
                println!("{}", suggestion.keyword);
            }
        }
        Commands::History { clear: true } => {
            client.history().clear()?;
            println!("Search history cleared");
        }
        Commands::History { clear: false } => {
            for item in client.history().list()? {
                println!(
                    "{:>3}x  {}  {}",
                    item.search_count,
                    item.last_searched.format("%Y-%m-%d %H:%M"),
                    item.query
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ClientError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
