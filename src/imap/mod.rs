//! Mailbox side of the relay: a blocking IMAP session and MIME
//! extraction of fetched messages.

pub mod client;
pub mod message;

pub use client::ImapSession;
pub use message::{Attachment, MailItem};
