//! The relay pipeline: fetch unseen mail over IMAP, render it through
//! the operator's templates, send it to the Telegram chat, then mark it
//! seen.
//!
//! Delivery is best effort. A message whose Telegram send fails stays
//! unseen and is picked up again on the next cycle; a message that
//! cannot be parsed or rendered is reported once and marked seen so it
//! never wedges the mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ImapError, Result};
use crate::imap::client::ImapSession;
use crate::imap::message::{Attachment, MailItem};
use crate::telegram::api::{escape_markdown, SendTarget, TelegramApi};
use crate::templates::MessageTemplates;

/// Relayed body text is cut at this many characters; the full mail
/// stays in the mailbox.
const MAX_BODY_CHARS: usize = 1000;

pub struct MailForwarder {
    imap_host: String,
    imap_port: u16,
    login: String,
    password: SecretString,
    target: SendTarget,
    check_interval_secs: u64,
    templates: MessageTemplates,
    api: Arc<TelegramApi>,
}

/// Result of one IMAP pass: raw messages plus the UIDs that failed to
/// fetch (left unseen, retried next cycle).
struct FetchBatch {
    messages: Vec<(u32, Vec<u8>)>,
    failed: Vec<u32>,
}

enum RelayOutcome {
    /// Delivered; mark seen.
    Sent,
    /// Unprocessable; report once and mark seen so it is not retried.
    Poison,
    /// Telegram unreachable; leave unseen for the next cycle.
    SendFailed,
}

impl MailForwarder {
    pub fn new(config: &Config, templates: MessageTemplates, api: Arc<TelegramApi>) -> Self {
        Self {
            imap_host: config.imap_host.clone(),
            imap_port: config.imap_port,
            login: config.mail_login.clone(),
            password: config.mail_password.clone(),
            target: SendTarget::new(config.group_id, config.thread_id),
            check_interval_secs: config.check_interval_secs,
            templates,
            api,
        }
    }

    pub fn templates(&self) -> &MessageTemplates {
        &self.templates
    }

    /// Run one poll cycle. Returns how many messages were relayed.
    pub async fn check_new_mail(&self) -> Result<usize> {
        let batch = self.fetch_unseen().await?;

        if !batch.failed.is_empty() {
            warn!(
                "Failed to fetch {} message(s), will retry next cycle",
                batch.failed.len()
            );
            self.send_template("fetch_error", &[]).await;
        }
        if batch.messages.is_empty() {
            return Ok(0);
        }
        info!("Found {} new email(s)", batch.messages.len());

        let mut processed = Vec::new();
        let mut forwarded = 0;
        for (uid, raw) in batch.messages {
            match self.relay(uid, &raw).await {
                RelayOutcome::Sent => {
                    processed.push(uid);
                    forwarded += 1;
                }
                RelayOutcome::Poison => processed.push(uid),
                RelayOutcome::SendFailed => {}
            }
        }

        if !processed.is_empty() {
            self.mark_seen(processed).await;
        }
        Ok(forwarded)
    }

    /// Connect, search unseen and fetch each message body. One IMAP
    /// session per cycle, driven on the blocking pool.
    async fn fetch_unseen(&self) -> Result<FetchBatch> {
        let host = self.imap_host.clone();
        let port = self.imap_port;
        let login = self.login.clone();
        let password = self.password.expose_secret().to_string();

        let result = tokio::task::spawn_blocking(move || -> std::result::Result<FetchBatch, ImapError> {
            let mut session = ImapSession::connect(&host, port)?;
            session.login(&login, &password)?;
            session.select_inbox()?;
            let uids = session.search_unseen()?;

            let mut messages = Vec::new();
            let mut failed = Vec::new();
            for uid in uids {
                match session.fetch(uid) {
                    Ok(raw) => messages.push((uid, raw)),
                    Err(e) => {
                        warn!(uid, "Fetch failed: {e}");
                        failed.push(uid);
                    }
                }
            }
            session.logout();
            Ok(FetchBatch { messages, failed })
        })
        .await;

        match result {
            Ok(Ok(batch)) => Ok(batch),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(ImapError::Task(e.to_string()).into()),
        }
    }

    /// Parse, render and send one message. Never returns an error; the
    /// outcome tells the cycle what to do with the UID.
    async fn relay(&self, uid: u32, raw: &[u8]) -> RelayOutcome {
        let item = match MailItem::parse(uid, raw) {
            Ok(item) => item,
            Err(e) => {
                error!(uid, "Unprocessable email: {e}");
                self.send_template("processing_error", &[]).await;
                return RelayOutcome::Poison;
            }
        };
        info!(uid, sender = %item.sender, subject = %item.subject, "Relaying email");

        let text = match self.render(&item) {
            Ok(text) => text,
            Err(e) => {
                error!(uid, "Failed to render email: {e}");
                self.send_template("processing_error", &[]).await;
                return RelayOutcome::Poison;
            }
        };

        let sent = match self.api.send_message(self.target, &text).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(uid, "Telegram send failed: {e}");
                return RelayOutcome::SendFailed;
            }
        };

        // Text is delivered from here on; attachment and pin problems
        // must not cause the whole mail to be re-relayed.
        if let Err(e) = self.send_attachments(item.attachments).await {
            error!(uid, "Failed to send attachments: {e}");
        }
        if let Err(e) = self
            .api
            .pin_message(self.target.chat_id, sent.message_id)
            .await
        {
            warn!("Could not pin message: {e}");
        }

        RelayOutcome::Sent
    }

    fn render(&self, item: &MailItem) -> Result<String> {
        let (body, ellipsis) = truncate_body(&item.body);
        let sender = escape_markdown(&item.sender);
        let subject = escape_markdown(&item.subject);
        let message = escape_markdown(&body);

        let text = self.templates.format(
            "new_email",
            &[
                ("sender", sender.as_str()),
                ("subject", subject.as_str()),
                ("message", message.as_str()),
                ("ellipsis", ellipsis),
            ],
        )?;
        Ok(text)
    }

    /// Photos first as media albums, then everything else as documents.
    async fn send_attachments(&self, attachments: Vec<Attachment>) -> Result<()> {
        if attachments.is_empty() {
            return Ok(());
        }
        info!("Sending {} attachment(s)", attachments.len());

        let (images, documents): (Vec<_>, Vec<_>) =
            attachments.into_iter().partition(Attachment::is_image);

        let mut photos = Vec::with_capacity(images.len());
        for attachment in images {
            photos.push(attachment.into_bytes().await?);
        }
        if !photos.is_empty() {
            self.api.send_media_groups(self.target, photos).await?;
        }

        let mut files = Vec::with_capacity(documents.len());
        for attachment in documents {
            files.push(attachment.into_bytes().await?);
        }
        if !files.is_empty() {
            self.api.send_documents(self.target, files).await?;
        }
        Ok(())
    }

    /// Mark relayed UIDs seen in a fresh session. Failures only warn:
    /// the worst case is the same mail being relayed twice.
    async fn mark_seen(&self, uids: Vec<u32>) {
        let host = self.imap_host.clone();
        let port = self.imap_port;
        let login = self.login.clone();
        let password = self.password.expose_secret().to_string();

        let result = tokio::task::spawn_blocking(move || -> std::result::Result<(), ImapError> {
            let mut session = ImapSession::connect(&host, port)?;
            session.login(&login, &password)?;
            session.select_inbox()?;
            for uid in &uids {
                session.store_seen(*uid)?;
            }
            session.logout();
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to mark emails seen: {e}"),
            Err(e) => error!("Mark seen task panicked: {e}"),
        }
    }

    /// Render the /mail_status reply.
    pub fn status_text(&self, active: bool) -> String {
        let key = if active {
            "mail_status_active"
        } else {
            "mail_status_inactive"
        };
        let group_id = self.target.chat_id.to_string();
        let interval = self.check_interval_secs.to_string();
        match self.templates.format(
            key,
            &[
                ("group_id", group_id.as_str()),
                ("check_interval", interval.as_str()),
            ],
        ) {
            Ok(text) => text,
            Err(e) => {
                error!("Template {key} failed: {e}");
                if active {
                    "Mail forwarding is active.".to_string()
                } else {
                    "Mail forwarding is stopped.".to_string()
                }
            }
        }
    }

    /// Render a service notice and send it to the destination chat.
    /// Template or send failures are logged, never propagated.
    async fn send_template(&self, key: &str, vars: &[(&str, &str)]) {
        let text = match self.templates.format(key, vars) {
            Ok(text) => text,
            Err(e) => {
                error!("Template {key} failed: {e}");
                return;
            }
        };
        if let Err(e) = self.api.send_message(self.target, &text).await {
            warn!("Failed to send {key} notice: {e}");
        }
    }
}

fn truncate_body(body: &str) -> (String, &'static str) {
    let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    let ellipsis = if body.chars().count() > MAX_BODY_CHARS {
        "..."
    } else {
        ""
    };
    (truncated, ellipsis)
}

/// Spawn the periodic mail check.
///
/// Returns a join handle and a shutdown flag; set the flag and the loop
/// exits at its next tick.
pub fn spawn_forwarder(forwarder: Arc<MailForwarder>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Mail forwarder started, checking {} every {}s",
            forwarder.imap_host, forwarder.check_interval_secs
        );

        // interval() panics on a zero period.
        let period = Duration::from_secs(forwarder.check_interval_secs.max(1));
        let mut tick = tokio::time::interval(period);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail forwarder shutting down");
                return;
            }

            if let Err(e) = forwarder.check_new_mail().await {
                error!("Mail check failed: {e}");
            }
        }
    });

    (handle, shutdown_flag)
}

// ── Tests ───────────────────────────────────────────────────────────
