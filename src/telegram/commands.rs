//! Service commands: long-polls getUpdates and answers /mail_status,
//! /mail_check and /about in whichever chat the command arrived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Mode;
use crate::forwarder::MailForwarder;
use crate::github::GithubClient;
use crate::telegram::api::{SendTarget, TelegramApi};

/// Server-side long poll timeout for getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;
/// Back off this long after a failed poll.
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Static facts behind the /about reply.
pub struct AboutInfo {
    pub username: Option<String>,
    pub version: String,
    pub mode: Mode,
    pub github: Option<GithubClient>,
}

/// Spawn the command loop.
///
/// `monitor` is the forwarder's shutdown flag; /mail_status reports the
/// relay as active while it is unset. Returns a handle and this loop's
/// own shutdown flag.
pub fn spawn_command_loop(
    api: Arc<TelegramApi>,
    forwarder: Arc<MailForwarder>,
    monitor: Arc<AtomicBool>,
    about: AboutInfo,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Command loop started");
        let mut offset: i64 = 0;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Command loop shutting down");
                return;
            }

            let updates = match api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {e}");
                    tokio::time::sleep(ERROR_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = update_id + 1;
                }
                handle_update(&api, &forwarder, &monitor, &about, &update).await;
            }
        }
    });

    (handle, shutdown_flag)
}

async fn handle_update(
    api: &TelegramApi,
    forwarder: &MailForwarder,
    monitor: &AtomicBool,
    about: &AboutInfo,
    update: &Value,
) {
    let Some(message) = update.get("message") else {
        return;
    };
    let Some(text) = message.get("text").and_then(Value::as_str) else {
        return;
    };
    let Some(chat_id) = message.pointer("/chat/id").and_then(Value::as_i64) else {
        return;
    };
    // Echo the topic only for forum messages; in plain supergroups the
    // thread id refers to a reply chain and is not a valid send target.
    let thread_id = message
        .get("is_topic_message")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        .then(|| message.get("message_thread_id").and_then(Value::as_i64))
        .flatten();
    let reply_to = SendTarget::new(chat_id, thread_id);

    let Some(command) = parse_command(text, about.username.as_deref()) else {
        return;
    };
    let from = message
        .pointer("/from/first_name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    match command {
        "mail_status" => {
            info!(from, "Status requested");
            let active = !monitor.load(Ordering::Relaxed);
            reply_text(api, reply_to, &forwarder.status_text(active)).await;
        }
        "mail_check" => {
            info!(from, "Manual mail check requested");
            reply_template(api, reply_to, forwarder, "mail_check_started").await;
            match forwarder.check_new_mail().await {
                Ok(count) => {
                    info!("Manual mail check done, {count} message(s) forwarded");
                    reply_template(api, reply_to, forwarder, "mail_check_completed").await;
                }
                Err(e) => {
                    error!("Manual mail check failed: {e}");
                    reply_template(api, reply_to, forwarder, "mail_check_error").await;
                }
            }
        }
        "about" => {
            reply_text(api, reply_to, &about_text(about).await).await;
        }
        _ => {}
    }
}

/// Extract the command name from a message, tolerating a trailing
/// @BotName only when it names this bot.
fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<&'a str> {
    let first = text.split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    if command.is_empty() {
        return None;
    }
    match command.split_once('@') {
        Some((name, suffix)) => {
            if bot_username.is_some_and(|username| username.eq_ignore_ascii_case(suffix)) {
                Some(name)
            } else {
                None
            }
        }
        None => Some(command),
    }
}

async fn about_text(about: &AboutInfo) -> String {
    let name = about.username.as_deref().unwrap_or("mailgram");
    let mut text = format!(
        "Mail relay bot @{name}\nVersion: {}\nMode: {}",
        about.version,
        about.mode.as_str()
    );
    if let Some(github) = &about.github {
        match github.latest_commit().await {
            Ok(date) => {
                text.push_str(&format!(
                    "\nLast update: {}",
                    date.format("%Y-%m-%d %H:%M UTC")
                ));
            }
            Err(e) => warn!("Could not fetch last commit date: {e}"),
        }
    }
    text
}

async fn reply_template(
    api: &TelegramApi,
    target: SendTarget,
    forwarder: &MailForwarder,
    key: &str,
) {
    let text = match forwarder.templates().format(key, &[]) {
        Ok(text) => text,
        Err(e) => {
            error!("Template {key} failed: {e}");
            return;
        }
    };
    reply_text(api, target, &text).await;
}

async fn reply_text(api: &TelegramApi, target: SendTarget, text: &str) {
    if let Err(e) = api.send_message(target, text).await {
        warn!("Failed to send command reply: {e}");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_plain_commands() {
        assert_eq!(parse_command("/mail_status", None), Some("mail_status"));
        assert_eq!(parse_command("/mail_check", Some("MailBot")), Some("mail_check"));
        assert_eq!(parse_command("/about extra words", None), Some("about"));
    }

    #[test]
    fn recognizes_addressed_commands_for_this_bot() {
        assert_eq!(
            parse_command("/mail_status@MailBot", Some("MailBot")),
            Some("mail_status")
        );
        assert_eq!(
            parse_command("/mail_status@mailbot", Some("MailBot")),
            Some("mail_status")
        );
    }

    #[test]
    fn ignores_commands_addressed_to_other_bots() {
        assert_eq!(parse_command("/mail_status@OtherBot", Some("MailBot")), None);
        assert_eq!(parse_command("/mail_status@MailBot", None), None);
    }

    #[test]
    fn ignores_non_commands() {
        assert_eq!(parse_command("mail_status", None), None);
        assert_eq!(parse_command("hello there", None), None);
        assert_eq!(parse_command("/", None), None);
        assert_eq!(parse_command("", None), None);
    }

    #[test]
    fn topic_echo_requires_forum_flag() {
        let forum: Value = serde_json::json!({
            "is_topic_message": true,
            "message_thread_id": 77,
        });
        let reply_chain: Value = serde_json::json!({
            "message_thread_id": 77,
        });

        let thread_of = |message: &Value| {
            message
                .get("is_topic_message")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                .then(|| message.get("message_thread_id").and_then(Value::as_i64))
                .flatten()
        };
        assert_eq!(thread_of(&forum), Some(77));
        assert_eq!(thread_of(&reply_chain), None);
    }
}
