//! Runtime configuration, read from environment variables.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default seconds between mailbox checks.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
/// Default port for the liveness endpoint.
pub const DEFAULT_HTTP_PORT: u16 = 4022;
/// Default audit log file.
pub const DEFAULT_LOG_FILE: &str = "logs/mailgram.log";

/// Bot operation mode. Selects which Telegram API token is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Production,
    Development,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Production => "production",
            Mode::Development => "development",
        }
    }

    /// Environment variable holding the bot token for this mode.
    pub fn token_var(self) -> &'static str {
        match self {
            Mode::Production => "PRODUCTION_TELEGRAM_API_TOKEN",
            Mode::Development => "DEVELOPMENT_TELEGRAM_API_TOKEN",
        }
    }
}

/// Everything the daemon needs to run, validated up front so a typo in
/// the environment fails at startup instead of mid-cycle.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Path to the JSON message template file.
    pub template_path: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub mail_login: String,
    pub mail_password: SecretString,
    /// Destination chat. Negative for groups and channels.
    pub group_id: i64,
    /// Forum topic within the chat, if any.
    pub thread_id: Option<i64>,
    pub bot_token: SecretString,
    pub github_token: Option<SecretString>,
    /// "owner/repo" for the last-commit lookup in /about.
    pub github_repo: Option<String>,
    pub check_interval_secs: u64,
    pub http_port: u16,
    pub log_file: String,
}

impl Config {
    pub fn from_env(mode: Mode) -> Result<Self, ConfigError> {
        let template_path = require("MODULE_TEXT")?;
        let imap_host = require("IMAP_HOST")?;
        let imap_port = match require("IMAP_PORT")?.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "IMAP_PORT".to_string(),
                    message: "must be a nonzero TCP port".to_string(),
                });
            }
        };
        let mail_login = require("MAIL_LOGIN")?;
        let mail_password = SecretString::from(require("MAIL_PASSWORD")?);

        let group_raw = require("GROUP_ID")?;
        let thread_raw = optional("THREAD_ID");
        let (group_id, thread_id) = parse_chat_target(&group_raw, thread_raw.as_deref())?;

        let bot_token = SecretString::from(require(mode.token_var())?);

        let github_token = optional("GITHUB_TOKEN").map(SecretString::from);
        let github_repo = optional("GITHUB_REPO");

        let check_interval_secs = check_interval(optional("MAIL_CHECK_INTERVAL_SECS"))?;
        let http_port = listen_port(optional("HTTP_PORT"))?;
        let log_file = optional("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

        Ok(Self {
            mode,
            template_path,
            imap_host,
            imap_port,
            mail_login,
            mail_password,
            group_id,
            thread_id,
            bot_token,
            github_token,
            github_repo,
            check_interval_secs,
            http_port,
            log_file,
        })
    }
}

/// Read a required variable from the environment.
fn require(key: &str) -> Result<String, ConfigError> {
    required_value(key, std::env::var(key).ok())
}

/// A required value. Trimmed; empty or whitespace-only counts as
/// missing.
fn required_value(key: &str, raw: Option<String>) -> Result<String, ConfigError> {
    match raw {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Read an optional variable from the environment.
fn optional(key: &str) -> Option<String> {
    optional_value(std::env::var(key).ok())
}

/// An optional value. Trimmed; blank means unset.
fn optional_value(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Seconds between mailbox checks. Unset falls back to the default; a
/// set value must be a positive number, since the poll timer cannot
/// run on a zero period.
fn check_interval(raw: Option<String>) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_CHECK_INTERVAL_SECS);
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            key: "MAIL_CHECK_INTERVAL_SECS".to_string(),
            message: "must be a positive number of seconds".to_string(),
        }),
    }
}

/// Liveness endpoint port. Port 0 would bind an ephemeral port and
/// break the advertised probe URL, so it is rejected.
fn listen_port(raw: Option<String>) -> Result<u16, ConfigError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_HTTP_PORT);
    };
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidValue {
            key: "HTTP_PORT".to_string(),
            message: "must be a nonzero TCP port".to_string(),
        }),
    }
}

/// Validate the destination chat id and optional forum topic.
///
/// Group and channel ids are negative; Telegram only supports topics in
/// supergroups, whose ids start with -100.
fn parse_chat_target(
    group: &str,
    thread: Option<&str>,
) -> Result<(i64, Option<i64>), ConfigError> {
    let group = group.trim();
    if !group.starts_with('-') {
        return Err(ConfigError::InvalidValue {
            key: "GROUP_ID".to_string(),
            message: format!("{group} is not a group or channel id (must be negative)"),
        });
    }
    if thread.is_some() && !group.starts_with("-100") {
        return Err(ConfigError::InvalidValue {
            key: "THREAD_ID".to_string(),
            message: format!("topics require a supergroup id starting with -100, got {group}"),
        });
    }

    let group_id = group.parse().map_err(|_| ConfigError::InvalidValue {
        key: "GROUP_ID".to_string(),
        message: format!("{group} is not a valid chat id"),
    })?;
    let thread_id = match thread {
        Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: "THREAD_ID".to_string(),
            message: format!("{raw} is not a valid topic id"),
        })?),
        None => None,
    };

    Ok((group_id, thread_id))
}

// ── Tests ───────────────────────────────────────────────────────────
