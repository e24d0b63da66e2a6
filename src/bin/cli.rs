//! photon-session CLI
//!
//! Inspect and manage the stored sessions of a device:
//! - List users and show their records
//! - Switch the active user, log in and out
//! - Mark and check seen posts
//! - Run the page-load bootstrap against the Reddit API

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use photon_session::session::{AuthPatch, GUEST_USER_NAME};
use photon_session::{
    generate_default_config, Config, LoggingConfig, Notice, NoticeSink, RedditClient,
    SessionPatch, SessionRegistry, SharedStorage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "photon-session")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage the Reddit sessions stored on this device")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(long, global = true)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current user and store state
    Status,

    /// List stored users
    Users,

    /// Print a user's record as JSON
    Show {
        /// User name (default: current user)
        user: Option<String>,
    },

    /// Make a stored user current
    Switch {
        /// User name, or "#guest"
        user: String,
    },

    /// Store OAuth tokens for a new login and resolve the user name
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: i64,
        #[arg(long, default_value = "")]
        scopes: String,
    },

    /// Log the current user out and switch to the guest session
    Logout,

    /// Fetch the current user's name using the stored token
    Whoami,

    /// Seen posts
    Seen {
        #[command(subcommand)]
        action: SeenAction,
    },

    /// Run the page-load sequence and print what happened
    Bootstrap,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SeenAction {
    /// Mark a post as seen now
    Mark { id: String },
    /// Print when a post was first seen
    Check { id: String },
    /// Forget one post, or all posts without an id
    Clear { id: Option<String> },
}

/// Prints notices to stderr
struct StderrNotices;

impl NoticeSink for StderrNotices {
    fn notify(&self, notice: Notice) {
        eprintln!("{}", notice);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    init_logging(&config.logging);

    let shared = SharedStorage::new();
    let registry = SessionRegistry::open(&config, &shared);
    let notices: Arc<dyn NoticeSink> = Arc::new(StderrNotices);
    registry.observers().set_notice_sink(&notices);

    let result = run(cli.command, &config, &registry).await;
    registry.teardown().await;
    result
}

async fn run(command: Commands, config: &Config, registry: &SessionRegistry) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let session = registry.init().await;

            println!("photon-session v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("User:        {}", session.display_name());
            println!("Logged in:   {}", session.is_logged_in());
            if let Some(expiration) = session.read(|d| d.auth.expiration) {
                println!("Token until: {}", format_ms(expiration));
            }
            println!("Storage:     {:?} ({})", registry.persistence(), config.storage.data_dir);
            println!("Unread:      {}", session.inbox_unread_count());
            println!("Seen posts:  {}", registry.seen_posts().len());
        }

        Commands::Users => {
            registry.init().await;
            let active = registry.global().last_active_user();
            let users = registry.users().await?;

            if users.is_empty() {
                println!("No stored users.");
            }
            for user in users {
                let marker = if active.as_deref() == Some(user.as_str()) { "*" } else { " " };
                println!("{} {}", marker, user);
            }
        }

        Commands::Show { user } => {
            let session = match user {
                Some(name) => {
                    registry.init().await;
                    registry.user(&name).await
                }
                None => registry.init().await,
            };
            println!("{}", serde_json::to_string_pretty(&session.data())?);
        }

        Commands::Switch { user } => {
            registry.init().await;
            let session = registry.switch_user(&user).await?;
            println!("Switched to {}", session.display_name());
        }

        Commands::Login {
            access_token,
            refresh_token,
            expires_in,
            scopes,
        } => {
            registry.init().await;
            let now = Utc::now().timestamp_millis();
            let session = registry.login_placeholder().await;
            session
                .update(SessionPatch::new().auth(
                    AuthPatch::new()
                        .access_token(access_token)
                        .refresh_token(refresh_token)
                        .expiration(now + expires_in.saturating_mul(1000))
                        .scopes(scopes)
                        .login_time(now)
                        .is_logged_in(true),
                ))
                .await?;

            let reddit = RedditClient::new(config.reddit_config())?;
            if session.fetch_name(&reddit, registry.global()).await? {
                println!("Logged in as {}", session.display_name());
            } else {
                eprintln!("Reddit rejected the token; the login stays pending as #login");
            }
        }

        Commands::Logout => {
            let session = registry.init().await;
            if session.is_guest() {
                println!("Not logged in.");
                return Ok(());
            }
            session
                .update(SessionPatch::new().auth(AuthPatch::logged_out()))
                .await?;
            registry.switch_user(GUEST_USER_NAME).await?;
            println!("Logged out {}", session.display_name());
        }

        Commands::Whoami => {
            let session = registry.init().await;
            let reddit = RedditClient::new(config.reddit_config())?;

            if session.fetch_name(&reddit, registry.global()).await? {
                println!("{}", session.display_name());
            } else {
                eprintln!("Reddit rejected the stored token for {}", session.display_name());
            }
        }

        Commands::Seen { action } => {
            registry.init().await;
            let seen = registry.seen_posts();

            match action {
                SeenAction::Mark { id } => {
                    seen.mark_seen(&id);
                    seen.save().await?;
                    println!("Marked {} as seen", id);
                }
                SeenAction::Check { id } => match seen.seen_at(&id) {
                    Some(at) => println!("{} seen at {}", id, format_ms(at * 1000)),
                    None => println!("{} not seen", id),
                },
                SeenAction::Clear { id: Some(id) } => {
                    seen.forget(&id).await?;
                    println!("Forgot {}", id);
                }
                SeenAction::Clear { id: None } => {
                    seen.clear().await?;
                    println!("Cleared all seen posts");
                }
            }
        }

        Commands::Bootstrap => {
            let reddit = RedditClient::new(config.reddit_config())?;
            let report = registry.bootstrap(&reddit).await;
            println!("{:#?}", report);
        }

        // Handled before the registry opens
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("photon_session={}", logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
