use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::{ClientSettings, DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH};

/// Application name used for the default data directory
const APP_NAME: &str = "console-session";

/// Session database file name
const SESSION_DB_FILE: &str = "session.sqlite3";

/// Provisioning console session tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the console REST API
    #[arg(short = 'u', long, env = "CONSOLE_API_URL")]
    pub api_url: Option<String>,

    /// Login endpoint path
    #[arg(long, env = "CONSOLE_LOGIN_PATH", default_value = DEFAULT_LOGIN_PATH)]
    pub login_path: String,

    /// Token refresh endpoint path
    #[arg(long, env = "CONSOLE_REFRESH_PATH", default_value = DEFAULT_REFRESH_PATH)]
    pub refresh_path: String,

    /// Path to the session database
    #[arg(short = 'd', long, env = "CONSOLE_SESSION_DB")]
    pub session_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// Token refresh timeout in seconds
    #[arg(long, env = "TOKEN_REFRESH_TIMEOUT", default_value = "30")]
    pub refresh_timeout: u64,

    /// Max idle connections per host
    #[arg(long, env = "HTTP_MAX_CONNECTIONS", default_value = "20")]
    pub max_connections: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long, env = "CONSOLE_EMAIL")]
        email: Option<String>,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
    /// Show session state
    Status,
    /// Manage the active organization
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },
    /// List organizations
    Orgs,
    /// Manage members of the active organization
    Members {
        #[command(subcommand)]
        action: MemberAction,
    },
    /// Authenticated GET of an arbitrary API path
    Get { path: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum OrgAction {
    /// Make an organization active
    Use { id: String },
    /// Clear the active organization
    Clear,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MemberAction {
    List,
    Remove { member_id: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: Url,
    pub login_path: String,
    pub refresh_path: String,

    // Storage
    pub session_db: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub token_refresh_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_url = args
            .api_url
            .context("CONSOLE_API_URL is required (use -u or set CONSOLE_API_URL env var)")?;
        let api_url =
            Url::parse(&api_url).with_context(|| format!("Invalid CONSOLE_API_URL: {}", api_url))?;

        let session_db = match args.session_db {
            Some(path) => expand_tilde(&path),
            None => default_session_db()?,
        };

        let config = Config {
            api_url,
            login_path: args.login_path,
            refresh_path: args.refresh_path,
            session_db,
            http_max_connections: args.max_connections,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            token_refresh_timeout: args.refresh_timeout,
            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "CONSOLE_API_URL must be http or https, got: {}",
                self.api_url
            );
        }

        for (name, path) in [
            ("CONSOLE_LOGIN_PATH", &self.login_path),
            ("CONSOLE_REFRESH_PATH", &self.refresh_path),
        ] {
            if !path.starts_with('/') {
                anyhow::bail!("{} must start with '/': {}", name, path);
            }
        }

        if self.token_refresh_timeout == 0 {
            anyhow::bail!("TOKEN_REFRESH_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api_url.clone(),
            login_path: self.login_path.clone(),
            refresh_path: self.refresh_path.clone(),
            max_connections: self.http_max_connections,
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            refresh_timeout: Duration::from_secs(self.token_refresh_timeout),
        }
    }
}

/// `<data dir>/console-session/session.sqlite3`
fn default_session_db() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
    Ok(data_dir.join(APP_NAME).join(SESSION_DB_FILE))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
