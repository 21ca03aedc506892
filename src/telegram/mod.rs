//! Telegram side of the relay: the Bot API client and the command
//! loop.

pub mod api;
pub mod commands;

pub use api::{SendTarget, TelegramApi};
