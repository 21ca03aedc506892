//! Minimal blocking IMAP4rev1 client over rustls.
//!
//! Implements exactly the session the forwarder needs: LOGIN, SELECT,
//! UID SEARCH UNSEEN, UID FETCH BODY.PEEK[], UID STORE \Seen, LOGOUT.
//! Fetches use BODY.PEEK so a message is only marked seen by an
//! explicit STORE after it has been relayed. All methods block; drive
//! them through `tokio::task::spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ImapError;

/// Read timeout for server replies.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One logical reply line. IMAP literals (`{n}` followed by n raw
/// bytes) are captured separately so binary message bodies survive
/// untouched; `text` keeps the protocol tokens with the `{n}` markers
/// still in place.
#[derive(Debug)]
struct ServerLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// An IMAP session over a blocking transport. Production sessions run
/// over rustls via [`ImapSession::connect`]; the transport stays
/// generic so the protocol layer can be driven over canned byte
/// streams in tests.
pub struct ImapSession<S> {
    stream: S,
    tag_counter: u32,
}

impl ImapSession<TlsStream> {
    /// Open a TLS connection and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| ImapError::ServerName {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;
        let stream = rustls::StreamOwned::new(conn, tcp);

        Self::from_stream(stream)
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap an established transport and consume the server greeting.
    fn from_stream(stream: S) -> Result<Self, ImapError> {
        let mut session = Self {
            stream,
            tag_counter: 0,
        };
        let greeting = session.read_line()?;
        if !greeting.text.starts_with("* OK") && !greeting.text.starts_with("* PREAUTH") {
            return Err(ImapError::Command {
                command: "greeting".to_string(),
                reply: greeting.text,
            });
        }
        Ok(session)
    }

    pub fn login(&mut self, login: &str, password: &str) -> Result<(), ImapError> {
        self.command(
            "LOGIN",
            &format!("LOGIN {} {}", quote(login), quote(password)),
        )?;
        Ok(())
    }

    pub fn select_inbox(&mut self) -> Result<(), ImapError> {
        self.command("SELECT", "SELECT \"INBOX\"")?;
        Ok(())
    }

    /// UIDs of all unseen messages in the selected mailbox.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, ImapError> {
        let lines = self.command("UID SEARCH", "UID SEARCH UNSEEN")?;
        let mut uids = Vec::new();
        for line in &lines {
            if let Some(rest) = line.text.strip_prefix("* SEARCH") {
                uids.extend(
                    rest.split_whitespace()
                        .filter_map(|tok| tok.parse::<u32>().ok()),
                );
            }
        }
        Ok(uids)
    }

    /// Fetch the full raw message without touching its flags.
    pub fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, ImapError> {
        let lines = self.command("UID FETCH", &format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        // The body arrives as the literal on the untagged FETCH line.
        lines
            .iter()
            .filter(|line| line.text.starts_with("* ") && line.text.contains("FETCH"))
            .flat_map(|line| line.literals.first())
            .next()
            .cloned()
            .ok_or_else(|| ImapError::Malformed(format!("no body literal for UID {uid}")))
    }

    pub fn store_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.command("UID STORE", &format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
        Ok(())
    }

    /// Best effort. The server closes the connection after BYE, so
    /// failures here are not worth reporting.
    pub fn logout(&mut self) {
        let _ = self.command("LOGOUT", "LOGOUT");
    }

    // ── Wire helpers ────────────────────────────────────────────────

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Send one command and collect reply lines up to the tagged
    /// completion. Errors on anything but a tagged OK.
    fn command(&mut self, name: &str, cmd: &str) -> Result<Vec<ServerLine>, ImapError> {
        let tag = self.next_tag();
        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let done_prefix = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let tagged = line.text.starts_with(&done_prefix);
            lines.push(line);
            if tagged {
                break;
            }
        }

        // The loop only exits on the tagged line, so last() is it.
        let ok = lines
            .last()
            .is_some_and(|line| line.text[done_prefix.len()..].starts_with("OK"));
        if !ok {
            let reply = lines.last().map(|l| l.text.clone()).unwrap_or_default();
            return Err(ImapError::Command {
                command: name.to_string(),
                reply,
            });
        }
        Ok(lines)
    }

    fn read_line(&mut self) -> Result<ServerLine, ImapError> {
        read_server_line(&mut self.stream)
    }
}

/// Read one logical reply line, expanding any announced literals.
///
/// A line ending in `{n}` is followed by exactly n raw bytes and then
/// the continuation of the same line, which may announce another
/// literal.
fn read_server_line<R: Read>(reader: &mut R) -> Result<ServerLine, ImapError> {
    let mut text = Vec::new();
    let mut literals = Vec::new();

    loop {
        loop {
            let mut byte = [0u8; 1];
            match reader.read(&mut byte) {
                Ok(0) => return Err(ImapError::ConnectionClosed),
                Ok(_) => {
                    text.push(byte[0]);
                    if text.ends_with(b"\r\n") {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        match literal_len(&text) {
            Some(len) => {
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload)?;
                literals.push(payload);
                // Keep reading: the rest of the line follows the bytes.
            }
            None => break,
        }
    }

    Ok(ServerLine {
        text: String::from_utf8_lossy(&text).trim_end().to_string(),
        literals,
    })
}

/// Byte count from a trailing `{n}` literal marker, if present.
fn literal_len(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Quote a string for LOGIN, escaping backslash and double quote.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// ── Tests ───────────────────────────────────────────────────────────
