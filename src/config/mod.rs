//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::MAX_PAGE_SIZE;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "boardsync";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Command-line arguments for the boardsync binary.
#[derive(Debug, Parser)]
#[command(name = "boardsync", version, about = "Discussion board client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BOARDSYNC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the board server base URL.
    #[arg(long = "api-base-url", global = true, value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Override the request timeout.
    #[arg(long = "api-timeout-seconds", global = true, value_name = "SECONDS")]
    pub api_timeout_seconds: Option<u64>,

    /// Read the bearer token from this file.
    #[arg(long = "token-file", global = true, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub token_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the number of posts fetched per page.
    #[arg(long = "page-size", global = true, value_name = "COUNT")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List boards.
    Boards,
    /// Page through a board's posts.
    Posts(PostsArgs),
    /// Show a post with its comment threads.
    Show(ShowArgs),
    /// Toggle your like on a post.
    Like(LikeArgs),
    /// Add, edit or delete comments.
    #[command(subcommand)]
    Comment(CommentCommand),
    /// Write, edit or delete posts.
    #[command(subcommand)]
    Post(PostCommand),
    /// Board administration.
    #[command(subcommand)]
    Board(BoardCommand),
}

#[derive(Debug, Args, Clone)]
pub struct PostsArgs {
    /// Board slug.
    #[arg(value_name = "BOARD")]
    pub board: String,

    /// Sort order (latest|likes|views).
    #[arg(long, default_value = "latest")]
    pub sort: String,

    /// Full-text search.
    #[arg(long = "query", short = 'q', value_name = "TEXT")]
    pub query: Option<String>,

    /// Number of pages to load.
    #[arg(long, default_value_t = 1)]
    pub pages: u32,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    #[arg(value_name = "POST_ID")]
    pub post_id: i64,
}

#[derive(Debug, Args, Clone)]
pub struct LikeArgs {
    #[arg(value_name = "POST_ID")]
    pub post_id: i64,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommentCommand {
    /// Add a comment, optionally as a reply.
    Add {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
        /// Comment to reply to.
        #[arg(long = "parent", value_name = "COMMENT_ID")]
        parent_id: Option<i64>,
        #[arg(value_name = "BODY")]
        body: String,
    },
    /// Replace a comment's body.
    Edit {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
        #[arg(value_name = "COMMENT_ID")]
        comment_id: i64,
        #[arg(value_name = "BODY")]
        body: String,
    },
    /// Delete a comment.
    Delete {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
        #[arg(value_name = "COMMENT_ID")]
        comment_id: i64,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum PostCommand {
    /// Publish a new post.
    Create {
        #[arg(value_name = "BOARD")]
        board: String,
        #[arg(long)]
        title: String,
        /// Markdown body.
        #[arg(long)]
        body: String,
    },
    /// Replace a post's title and body.
    Update {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
        #[arg(value_name = "BOARD")]
        board: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
    },
    /// Delete a post.
    Delete {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
        #[arg(value_name = "BOARD")]
        board: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum BoardCommand {
    /// Create a board.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        slug: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Change a board's name, description or slug.
    Update {
        #[arg(value_name = "BOARD_ID")]
        id: i64,
        /// Current slug.
        #[arg(value_name = "SLUG")]
        slug: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "new-slug")]
        new_slug: Option<String>,
    },
    /// Delete a board.
    Delete {
        #[arg(value_name = "BOARD_ID")]
        id: i64,
        #[arg(value_name = "SLUG")]
        slug: String,
    },
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub page_size: u32,
    pub trust_server_like_count: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("BOARDSYNC").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    page_size: Option<u32>,
    trust_server_like_count: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(path) = overrides.token_file.as_ref() {
            self.api.token_file = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(size) = overrides.page_size {
            self.cache.page_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            logging,
            cache,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let token_file = api
        .token_file
        .filter(|path| !path.as_os_str().is_empty());

    Ok(ApiSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
        token_file,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    // The server refuses pages outside 1..=MAX_PAGE_SIZE.
    let page_size = cache
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    Ok(CacheSettings {
        page_size,
        trust_server_like_count: cache.trust_server_like_count.unwrap_or(true),
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
