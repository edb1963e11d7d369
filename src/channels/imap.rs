//! IMAP mailbox — fetches unseen messages over implicit TLS.
//!
//! Speaks just enough IMAP4rev1 for the poll loop: LOGIN, SELECT, SEARCH
//! UNSEEN, FETCH RFC822, STORE \Seen, LOGOUT. The socket is blocking, so
//! every fetch runs inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::{Mailbox, RawMessage};
use crate::error::MailboxError;

/// Socket connect/read/write timeout.
const IMAP_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
}

/// `Mailbox` backed by a real IMAP server.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen_blocking(&cfg))
            .await
            .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Tagged command response: untagged lines, any literals, final status.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
}

struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: config.host.clone(),
            reason,
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| connect_err("no address resolved".into()))?;
        let tcp = TcpStream::connect_timeout(&addr, IMAP_TIMEOUT)?;
        tcp.set_read_timeout(Some(IMAP_TIMEOUT))?;
        tcp.set_write_timeout(Some(IMAP_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                // The rest of the response line (usually ")") follows the literal.
                let rest = self.read_line()?;
                response.lines.push(format!("{}{}", line.trim_end(), rest.trim_end()));
                continue;
            }

            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                response.ok = status.starts_with("OK");
                if !response.ok {
                    debug!(command = %redact(cmd), status = %status.trim_end(), "IMAP command rejected");
                }
                return Ok(response);
            }
            response.lines.push(line.trim_end().to_string());
        }
    }
}

/// Size of a `{N}` literal announced at the end of a response line.
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let open = trimmed.rfind('{')?;
    let inner = trimmed[open + 1..].strip_suffix('}')?;
    inner.trim_end_matches('+').parse().ok()
}

/// Sequence numbers from `* SEARCH` untagged responses.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Quote a LOGIN argument as an IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Hide LOGIN credentials when a command is logged.
fn redact(cmd: &str) -> &str {
    if cmd.starts_with("LOGIN") { "LOGIN ***" } else { cmd }
}

/// Download each message in turn.
///
/// Messages fetched before a connection error are already `\Seen` on the
/// server, so they are returned rather than dropped with the error. The
/// error only surfaces when nothing was fetched.
fn fetch_batch(
    seqs: &[u32],
    mut fetch: impl FnMut(u32) -> Result<Option<Vec<u8>>, MailboxError>,
) -> Result<Vec<RawMessage>, MailboxError> {
    let mut messages = Vec::with_capacity(seqs.len());
    for &seq in seqs {
        match fetch(seq) {
            Ok(Some(bytes)) => messages.push(RawMessage::new(seq, bytes)),
            Ok(None) => warn!(seq, "FETCH returned no message body, skipping"),
            Err(e) if messages.is_empty() => return Err(e),
            Err(e) => {
                warn!(
                    seq,
                    kept = messages.len(),
                    error = %e,
                    "FETCH failed mid-batch, keeping messages already downloaded"
                );
                break;
            }
        }
    }
    Ok(messages)
}

/// Fetch unseen messages (blocking, run in spawn_blocking).
fn fetch_unseen_blocking(config: &ImapConfig) -> Result<Vec<RawMessage>, MailboxError> {
    let mut session = ImapSession::connect(config)?;

    let login = session.command(&format!(
        "LOGIN {} {}",
        quote(&config.username),
        quote(config.password.expose_secret())
    ))?;
    if !login.ok {
        return Err(MailboxError::AuthFailed {
            username: config.username.clone(),
        });
    }

    let select = session.command(&format!("SELECT {}", quote(&config.folder)))?;
    if !select.ok {
        return Err(MailboxError::Protocol(format!(
            "cannot select folder {}",
            config.folder
        )));
    }

    let search = session.command("SEARCH UNSEEN")?;
    if !search.ok {
        return Err(MailboxError::Protocol("SEARCH UNSEEN rejected".into()));
    }
    let seqs = parse_search(&search.lines);
    debug!(count = seqs.len(), "Unseen messages on server");

    let messages = fetch_batch(&seqs, |seq| {
        let fetch = session.command(&format!("FETCH {seq} RFC822"))?;
        let body = match fetch.literals.into_iter().next() {
            Some(bytes) if fetch.ok => bytes,
            _ => return Ok(None),
        };

        // FETCH RFC822 already sets \Seen on most servers; be explicit.
        if let Err(e) = session.command(&format!("STORE {seq} +FLAGS (\\Seen)")) {
            warn!(seq, error = %e, "Failed to mark message as seen");
        }
        Ok(Some(body))
    })?;

    let _ = session.command("LOGOUT");
    info!(count = messages.len(), host = %config.host, "Fetched unseen messages");
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_size_parses_trailing_literal() {
        assert_eq!(literal_size("* 1 FETCH (RFC822 {1234}\r\n"), Some(1234));
        assert_eq!(literal_size("* 1 FETCH (RFC822 {12+}\r\n"), Some(12));
    }

    #[test]
    fn literal_size_ignores_plain_lines() {
        assert_eq!(literal_size("* 3 EXISTS\r\n"), None);
        assert_eq!(literal_size("A0001 OK done\r\n"), None);
        assert_eq!(literal_size("* OK {not a number}\r\n"), None);
    }

    #[test]
    fn parse_search_collects_ids() {
        let lines = vec![
            "* SEARCH 2 5 9".to_string(),
            "* OK still here".to_string(),
        ];
        assert_eq!(parse_search(&lines), vec![2, 5, 9]);
    }

    #[test]
    fn parse_search_empty_result() {
        let lines = vec!["* SEARCH".to_string()];
        assert!(parse_search(&lines).is_empty());
    }

    #[test]
    fn fetch_batch_keeps_messages_before_a_failure() {
        let mut asked = Vec::new();
        let messages = fetch_batch(&[3, 4, 5, 6], |seq| {
            asked.push(seq);
            match seq {
                3 => Ok(Some(b"Subject: a\r\n\r\nx".to_vec())),
                4 => Ok(None),
                5 => Err(MailboxError::Protocol("connection reset".into())),
                _ => Ok(Some(b"Subject: d\r\n\r\ny".to_vec())),
            }
        })
        .unwrap();

        assert_eq!(asked, vec![3, 4, 5]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq, 3);
    }

    #[test]
    fn fetch_batch_fails_when_nothing_was_fetched() {
        let err = fetch_batch(&[1, 2], |_| Err(MailboxError::Protocol("timeout".into()))).unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(_)));
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
        assert_eq!(quote("user@example.com"), "\"user@example.com\"");
    }

    #[test]
    fn redact_hides_login() {
        assert_eq!(redact("LOGIN \"u\" \"p\""), "LOGIN ***");
        assert_eq!(redact("SEARCH UNSEEN"), "SEARCH UNSEEN");
    }
}
