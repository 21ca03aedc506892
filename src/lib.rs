//! mailgram: relays unread IMAP mail into a Telegram chat.

pub mod audit;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod github;
pub mod http;
pub mod imap;
pub mod telegram;
pub mod templates;
