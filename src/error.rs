//! Error types for mailgram.

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IMAP error: {0}")]
    Imap(#[from] ImapError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Telegram error: {0}")]
    Telegram(#[from] TelegramError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Message template errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template file not found: {path}")]
    NotFound { path: String },

    #[error("Invalid JSON in template file {path}: {reason}")]
    InvalidJson { path: String, reason: String },

    #[error("Template file {path} must be a JSON object of strings")]
    NotAnObject { path: String },

    #[error("Template value for {key} must be a string")]
    NotAString { key: String },

    #[error("Unknown template key: {key}")]
    UnknownKey { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// IMAP session errors.
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    #[error("Connection closed by IMAP server")]
    ConnectionClosed,

    #[error("IMAP {command} failed: {reply}")]
    Command { command: String, reply: String },

    #[error("Malformed IMAP response: {0}")]
    Malformed(String),

    #[error("Invalid IMAP server name {host}: {reason}")]
    ServerName { host: String, reason: String },

    #[error("IMAP task failed: {0}")]
    Task(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Unparseable message for UID {uid}")]
    Unparseable { uid: u32 },

    #[error("Failed to spool attachment {name}: {reason}")]
    Spool { name: String, reason: String },
}

/// Telegram Bot API errors.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Telegram {method} rejected: {description}")]
    Api { method: String, description: String },

    #[error("HTTP error calling {method}: {reason}")]
    Http { method: String, reason: String },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
