//! IMAP mailbox over TLS.
//!
//! Speaks just enough IMAP4rev1 for triage: LOGIN, CAPABILITY, LIST,
//! CREATE, SELECT, UID SEARCH/FETCH/STORE/COPY and APPEND. The protocol
//! is blocking, so every call runs in `spawn_blocking` against a session
//! held behind a mutex. UIDs are used as message ids so they survive
//! reconnects.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::{Mailbox, MailboxConnector, parse_message, resolve_credential};
use crate::pipeline::types::{Candidate, Category, Message, TimeWindow};

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP server settings shared by every candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub drafts_folder: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            drafts_folder: "[Gmail]/Drafts".to_string(),
        }
    }
}

// ── Protocol ────────────────────────────────────────────────────────

/// A tagged command's response.
#[derive(Debug, Default)]
struct Response {
    /// Untagged and continuation lines, CRLF included.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks), in order of appearance.
    literals: Vec<Vec<u8>>,
    /// The tagged completion line.
    status: String,
}

/// Blocking IMAP session over any byte stream.
struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn read_greeting(&mut self, host: &str) -> Result<(), MailboxError> {
        let greeting = self.read_line()?;
        if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Connection {
                host: host.to_string(),
                reason: format!("unexpected greeting: {}", greeting.trim_end()),
            })
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), MailboxError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn tag(&mut self) -> String {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Read until the tagged completion line for `tag`.
    fn read_response(&mut self, tag: &str) -> Result<Response, MailboxError> {
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if is_tagged(&line, tag) {
                response.status = line.trim_end().to_string();
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    /// Send a command and require an OK completion.
    fn command(&mut self, command: &str) -> Result<Response, MailboxError> {
        let tag = self.tag();
        self.write_raw(format!("{tag} {command}\r\n").as_bytes())?;
        let response = self.read_response(&tag)?;
        if status_ok(&response.status, &tag) {
            Ok(response)
        } else {
            Err(MailboxError::Command {
                command: verb(command),
                reason: response.status,
            })
        }
    }

    fn login(&mut self, user: &str, password: &SecretString) -> Result<(), MailboxError> {
        let tag = self.tag();
        let line = format!(
            "{tag} LOGIN {} {}\r\n",
            quote(user),
            quote(password.expose_secret())
        );
        self.write_raw(line.as_bytes())?;
        let response = self.read_response(&tag)?;
        if status_ok(&response.status, &tag) {
            Ok(())
        } else {
            Err(MailboxError::AuthFailed {
                address: user.to_string(),
                reason: format!(
                    "{} (check the address, and use an app password if two-factor \
                     authentication is enabled)",
                    response.status
                ),
            })
        }
    }

    fn capabilities(&mut self) -> Result<Vec<String>, MailboxError> {
        let response = self.command("CAPABILITY")?;
        Ok(response
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* CAPABILITY "))
            .flat_map(|l| l.split_whitespace().map(str::to_ascii_uppercase))
            .collect())
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let response = self.command("LIST \"\" \"*\"")?;
        Ok(response
            .lines
            .iter()
            .filter_map(|l| parse_list_name(l))
            .collect())
    }

    /// Create any of `labels` that don't exist yet.
    fn ensure_folders(&mut self, labels: &[&str]) -> Result<(), MailboxError> {
        let existing = self.list_folders()?;
        for label in labels {
            if existing.iter().any(|f| f.eq_ignore_ascii_case(label)) {
                continue;
            }
            self.command(&format!("CREATE {}", quote(label)))?;
            info!(label = label, "Created mailbox label");
        }
        Ok(())
    }

    fn search(&mut self, window: &TimeWindow) -> Result<Vec<String>, MailboxError> {
        let response = self.command(&format!(
            "UID SEARCH SINCE {} BEFORE {}",
            imap_date(window.start),
            imap_date(window.end)
        ))?;
        Ok(parse_search(&response.lines))
    }

    fn fetch_raw(&mut self, uid: &str) -> Result<Option<Vec<u8>>, MailboxError> {
        let mut response = self.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        if response.literals.is_empty() {
            return Ok(None);
        }
        Ok(Some(response.literals.swap_remove(0)))
    }

    /// Fetch and parse every message in `window`.
    ///
    /// A UID that fails to fetch or parse is logged and left out; only a
    /// failed search fails the listing.
    fn messages_in(
        &mut self,
        window: &TimeWindow,
        address: &str,
    ) -> Result<Vec<Message>, MailboxError> {
        let uids = self.search(window)?;
        debug!(address = %address, count = uids.len(), window = %window, "Search complete");

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            let raw = match self.fetch_raw(&uid) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    warn!(address = %address, uid = %uid, "Fetch returned no body");
                    continue;
                }
                Err(e) => {
                    warn!(
                        address = %address,
                        uid = %uid,
                        error = %e,
                        "Fetch failed, message left for next run"
                    );
                    continue;
                }
            };
            match parse_message(&uid, &raw) {
                Some(message) => messages.push(message),
                None => warn!(address = %address, uid = %uid, "Unparseable message skipped"),
            }
        }
        Ok(messages)
    }

    fn append(&mut self, folder: &str, flags: &str, message: &[u8]) -> Result<(), MailboxError> {
        let tag = self.tag();
        self.write_raw(
            format!("{tag} APPEND {} ({flags}) {{{}}}\r\n", quote(folder), message.len())
                .as_bytes(),
        )?;

        let ready = self.read_line()?;
        if !ready.starts_with('+') {
            return Err(MailboxError::Command {
                command: "APPEND".into(),
                reason: ready.trim_end().to_string(),
            });
        }

        let mut payload = message.to_vec();
        payload.extend_from_slice(b"\r\n");
        self.write_raw(&payload)?;

        let response = self.read_response(&tag)?;
        if status_ok(&response.status, &tag) {
            Ok(())
        } else {
            Err(MailboxError::Command {
                command: "APPEND".into(),
                reason: response.status,
            })
        }
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

/// Length of a literal announced at the end of a line, e.g. `{312}\r\n`.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let body = trimmed.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

fn is_tagged(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag).is_some_and(|rest| rest.starts_with(' '))
}

fn status_ok(status: &str, tag: &str) -> bool {
    status
        .strip_prefix(tag)
        .is_some_and(|rest| rest.trim_start().starts_with("OK"))
}

/// Command name for error messages. Never includes arguments.
fn verb(command: &str) -> String {
    let mut words = command.split_whitespace();
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("UID") => {
            format!("UID {}", words.next().unwrap_or_default())
        }
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// IMAP search date, e.g. `01-Mar-2024`.
fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|l| l.split_whitespace().map(str::to_string))
        .collect()
}

/// Folder name from a `* LIST (flags) "delim" name` line.
fn parse_list_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("* LIST ")?;
    let after_flags = rest[rest.find(')')? + 1..].trim_start();

    let after_delim = if let Some(stripped) = after_flags.strip_prefix('"') {
        &stripped[stripped.find('"')? + 1..]
    } else {
        after_flags.strip_prefix("NIL")?
    };

    let name = after_delim.trim();
    let name = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.replace("\\\"", "\"").replace("\\\\", "\\"))
    }
}

fn connect_tls(config: &ImapConfig) -> Result<ImapSession<TlsStream>, MailboxError> {
    let connection_error = |reason: String| MailboxError::Connection {
        host: config.host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| connection_error(e.to_string()))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| connection_error(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connection_error(format!("TLS setup failed: {e}")))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    session.read_greeting(&config.host)?;
    Ok(session)
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// An authenticated IMAP session on one candidate's mailbox.
pub struct ImapMailbox {
    session: Arc<Mutex<ImapSession<TlsStream>>>,
    address: String,
    drafts_folder: String,
    gmail_labels: bool,
}

impl ImapMailbox {
    /// Run a blocking operation against the session.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, MailboxError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailboxError::Join("IMAP session lock poisoned".into()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| MailboxError::Join(e.to_string()))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_messages(&self, window: &TimeWindow) -> Result<Vec<Message>, MailboxError> {
        let window = *window;
        let address = self.address.clone();
        self.with_session(move |session| session.messages_in(&window, &address))
            .await
    }

    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
        let command = if self.gmail_labels {
            format!("UID STORE {message_id} +X-GM-LABELS ({})", quote(label))
        } else {
            format!("UID COPY {message_id} {}", quote(label))
        };
        self.with_session(move |session| session.command(&command).map(|_| ()))
            .await
    }

    async fn create_draft(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let from = self
            .address
            .parse::<lettre::message::Mailbox>()
            .map_err(|e| MailboxError::Draft(format!("invalid from address: {e}")))?;
        let to = to
            .parse::<lettre::message::Mailbox>()
            .map_err(|e| MailboxError::Draft(format!("invalid to address: {e}")))?;

        let email = lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailboxError::Draft(e.to_string()))?;
        let bytes = email.formatted();

        let folder = self.drafts_folder.clone();
        self.with_session(move |session| session.append(&folder, "\\Draft", &bytes))
            .await
    }

    async fn close(&self) {
        let address = self.address.clone();
        if let Err(e) = self
            .with_session(|session| session.command("LOGOUT").map(|_| ()))
            .await
        {
            debug!(address = %address, error = %e, "IMAP logout failed");
        }
    }
}

/// Connects candidates to their IMAP mailboxes.
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, candidate: &Candidate) -> Result<Box<dyn Mailbox>, MailboxError> {
        let password = resolve_credential(&candidate.credential_ref)?;
        let config = self.config.clone();
        let address = candidate.address.clone();

        let (session, gmail_labels) = tokio::task::spawn_blocking(move || {
            let mut session = connect_tls(&config)?;
            session.login(&address, &password)?;
            let gmail_labels = session
                .capabilities()?
                .iter()
                .any(|c| c == "X-GM-EXT-1");

            let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
            session.ensure_folders(&labels)?;
            session.command("SELECT \"INBOX\"")?;
            Ok::<_, MailboxError>((session, gmail_labels))
        })
        .await
        .map_err(|e| MailboxError::Join(e.to_string()))??;

        info!(
            candidate = %candidate.id,
            address = %candidate.address,
            gmail_labels,
            "Mailbox session opened"
        );

        Ok(Box::new(ImapMailbox {
            session: Arc::new(Mutex::new(session)),
            address: candidate.address.clone(),
            drafts_folder: self.config.drafts_folder.clone(),
            gmail_labels,
        }))
    }
}
