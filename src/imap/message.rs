//! MIME extraction: one fetched message into sender, subject, body and
//! attachments.

use std::io::Write;

use mail_parser::{MessageParser, MimeHeaders};
use tempfile::NamedTempFile;

use crate::error::MailError;

/// Attachments at or above this size are spooled to a temp file instead
/// of being held in memory.
pub const MAX_IN_MEMORY_ATTACHMENT: usize = 10 * 1024 * 1024;

/// Filenames longer than this are shortened before upload.
const MAX_FILENAME_CHARS: usize = 100;

/// Attachment payload. Spooled files are deleted when dropped.
pub enum AttachmentData {
    Memory(Vec<u8>),
    Spooled(NamedTempFile),
}

pub struct Attachment {
    pub filename: String,
    pub size: usize,
    pub data: AttachmentData,
}

impl Attachment {
    /// Photos are grouped into Telegram media albums; everything else
    /// goes out as a document.
    pub fn is_image(&self) -> bool {
        let lower = self.filename.to_lowercase();
        lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
    }

    /// Take the payload for sending. Spooled attachments are read back
    /// from disk here, just before upload.
    pub async fn into_bytes(self) -> Result<(String, Vec<u8>), MailError> {
        let Attachment { filename, data, .. } = self;
        match data {
            AttachmentData::Memory(bytes) => Ok((filename, bytes)),
            AttachmentData::Spooled(file) => match tokio::fs::read(file.path()).await {
                Ok(bytes) => Ok((filename, bytes)),
                Err(e) => Err(MailError::Spool {
                    name: filename,
                    reason: e.to_string(),
                }),
            },
        }
    }
}

/// One parsed email, ready to render and relay.
pub struct MailItem {
    pub uid: u32,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl MailItem {
    pub fn parse(uid: u32, raw: &[u8]) -> Result<Self, MailError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or(MailError::Unparseable { uid })?;

        let sender = extract_sender(&parsed);
        let subject = parsed.subject().unwrap_or("No Subject").to_string();
        let body = extract_body(&parsed);
        let attachments = extract_attachments(&parsed)?;

        Ok(Self {
            uid,
            sender,
            subject,
            body,
            attachments,
        })
    }
}

/// "Name <addr>" when both are present, falling back to whichever
/// exists, then to "Unknown".
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|from| from.first()) else {
        return "Unknown".to_string();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "Unknown".to_string(),
    }
}

/// All text/plain parts joined with a blank line; HTML stripped to text
/// when the message has no plain part.
fn extract_body(parsed: &mail_parser::Message) -> String {
    let mut parts = Vec::new();
    let mut idx = 0;
    while let Some(text) = parsed.body_text(idx) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        idx += 1;
    }
    if !parts.is_empty() {
        return parts.join("\n\n");
    }

    if let Some(html) = parsed.body_html(0) {
        return strip_html(&html);
    }
    String::new()
}

/// Crude HTML-to-text: drop tags, decode the handful of entities that
/// matter, collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_attachments(parsed: &mail_parser::Message) -> Result<Vec<Attachment>, MailError> {
    let mut out = Vec::new();
    for part in parsed.attachments() {
        let Some(name) = MimeHeaders::attachment_name(part) else {
            continue;
        };
        let contents = part.contents();
        if contents.is_empty() {
            continue;
        }

        let filename = sanitize_filename(name);
        let size = contents.len();
        let data = if size < MAX_IN_MEMORY_ATTACHMENT {
            AttachmentData::Memory(contents.to_vec())
        } else {
            AttachmentData::Spooled(spool(contents).map_err(|e| MailError::Spool {
                name: filename.clone(),
                reason: e.to_string(),
            })?)
        };
        out.push(Attachment {
            filename,
            size,
            data,
        });
    }
    Ok(out)
}

fn spool(contents: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

/// Make an attachment filename safe to pass on: strip path separators
/// and shell-special characters, collapse dot runs, cap the length.
/// Never returns an empty name.
pub fn sanitize_filename(name: &str) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();

    while safe.contains("..") {
        safe = safe.replace("..", ".");
    }
    let safe = safe.trim_start_matches('.').trim();

    if safe.is_empty() {
        return "attachment".to_string();
    }

    if safe.chars().count() > MAX_FILENAME_CHARS {
        let (stem, ext) = match safe.rfind('.') {
            Some(pos) if pos > 0 => safe.split_at(pos),
            _ => (safe, ""),
        };
        let stem: String = stem.chars().take(MAX_FILENAME_CHARS - 5).collect();
        return format!("{stem}{ext}");
    }

    safe.to_string()
}

// ── Tests ───────────────────────────────────────────────────────────
