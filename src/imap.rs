use crate::config::Config;
use crate::connection::{Connection, DEFAULT_TIMEOUT};
use crate::errors::*;
use crate::html;
use crate::imapresult::{Attachment, Email, ImapResponse, Mailbox};
use crate::imapresultimpl;
use crate::mime;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Longest single response line read in one go.
const MAX_LINE_LEN: usize = 64 * 1024;
/// Untagged data kept per command; anything past this is dropped.
const MAX_RESPONSE_LEN: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImapState {
    Disconnected,
    Connected,
    Authenticated,
    MailboxSelected,
}

impl fmt::Display for ImapState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            ImapState::Disconnected => "disconnected",
            ImapState::Connected => "not logged in",
            ImapState::Authenticated => "no mailbox is selected",
            ImapState::MailboxSelected => "a mailbox is selected",
        };
        f.write_str(s)
    }
}

/// A client session with one IMAP server.
///
/// Commands are strictly serialized: each one is tagged `A<n>` with a fresh
/// `n` and its completion line is read before the call returns. The
/// message and mailbox lists are owned here and replaced wholesale by
/// `fetch_emails` and `list_mailboxes`.
pub struct ImapSession {
    conn: Option<Connection>,
    state: ImapState,
    tag_counter: u32,
    current_mailbox: Option<String>,
    emails: Vec<Email>,
    mailboxes: Vec<Mailbox>,
}

impl ImapSession {
    pub fn connect(host: &str, port: u16, use_tls: bool) -> Result<ImapSession> {
        ImapSession::connect_timeout(host, port, use_tls, Some(DEFAULT_TIMEOUT))
    }

    /// Connect and read the greeting. `timeout` bounds every socket operation.
    pub fn connect_timeout(host: &str, port: u16, use_tls: bool, timeout: Option<Duration>) -> Result<ImapSession> {
        trace!("Initiate IMAP Connection");
        let conn = Connection::connect(host, port, use_tls, timeout)?;
        let mut session = ImapSession {
            conn: Some(conn),
            state: ImapState::Disconnected,
            tag_counter: 1,
            current_mailbox: None,
            emails: Vec::new(),
            mailboxes: Vec::new(),
        };

        let greeting = session.read_line()?;
        info!("S: {}", greeting.trim_end());
        session.set_state(ImapState::Connected);
        Ok(session)
    }

    /// Connect to the configured server and log in.
    pub fn open(config: &Config) -> Result<ImapSession> {
        let mut session = ImapSession::connect_timeout(
            &config.imap_server,
            config.imap_port,
            config.imap_use_ssl,
            config.timeout(),
        )?;
        session.login(&config.imap_username, &config.imap_password)?;
        Ok(session)
    }

    pub fn state(&self) -> ImapState {
        self.state
    }

    pub fn uses_tls(&self) -> bool {
        self.conn.as_ref().map_or(false, Connection::uses_tls)
    }

    pub fn current_mailbox(&self) -> Option<&str> {
        self.current_mailbox.as_ref().map(String::as_str)
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn email_count(&self) -> usize {
        self.emails.len()
    }

    pub fn email(&self, uid: u32) -> Option<&Email> {
        self.emails.iter().find(|e| e.uid == uid)
    }

    /// Mutable access for toggling local flags; the server is not told.
    pub fn email_mut(&mut self, uid: u32) -> Option<&mut Email> {
        self.emails.iter_mut().find(|e| e.uid == uid)
    }

    pub fn mailboxes(&self) -> &[Mailbox] {
        &self.mailboxes
    }

    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.require("log in", |s| s == ImapState::Connected)?;
        trace!("Attempting to Login");
        let command = format!("LOGIN {} {}", username, password);
        let masked = format!("LOGIN {} ****", username);
        self.send_command_masked(&command, &masked)?;
        self.set_state(ImapState::Authenticated);
        Ok(())
    }

    pub fn select_mailbox(&mut self, name: &str) -> Result<()> {
        self.require("select a mailbox", |s| s >= ImapState::Authenticated)?;
        let response = self.send_command(&format!("SELECT {}", name))?;

        if let Some(mailbox) = self.mailboxes.iter_mut().find(|m| m.name == name) {
            imapresultimpl::parse_select_counts(&response.text(), mailbox);
        }
        self.current_mailbox = Some(name.to_string());
        self.set_state(ImapState::MailboxSelected);
        Ok(())
    }

    /// Replace the message list with the headers of every message in the
    /// selected mailbox. Returns the new message count.
    pub fn fetch_emails(&mut self) -> Result<usize> {
        self.require("fetch messages", |s| s == ImapState::MailboxSelected)?;
        self.emails.clear();

        let response = self.send_command("FETCH 1:* (UID FLAGS BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)])")?;
        self.emails = imapresultimpl::parse_fetch_headers(&response.text());
        debug!("Fetched {} message headers", self.emails.len());
        Ok(self.emails.len())
    }

    /// Download the text of message `uid`.
    ///
    /// The result is stored on the matching entry of the message list,
    /// overwriting any earlier body: HTML goes to `html_body`, anything else
    /// to `body`.
    pub fn fetch_email_body(&mut self, uid: u32) -> Result<String> {
        self.require("fetch a message body", |s| s == ImapState::MailboxSelected)?;
        let response = self.send_command(&format!("UID FETCH {} BODY[TEXT]", uid))?;
        let body = imapresultimpl::extract_body(&response.data);

        if let Some(email) = self.email_mut(uid) {
            if html::is_html(&body) {
                email.html_body = Some(body.clone());
                email.body = None;
            } else {
                email.body = Some(body.clone());
                email.html_body = None;
            }
        }
        Ok(body)
    }

    pub fn mark_seen(&mut self, uid: u32) -> Result<()> {
        self.store_flag(uid, "+FLAGS (\\Seen)")
    }

    pub fn mark_unseen(&mut self, uid: u32) -> Result<()> {
        self.store_flag(uid, "-FLAGS (\\Seen)")
    }

    /// Flag `uid` as deleted on the server; it disappears at the next expunge.
    pub fn delete_email(&mut self, uid: u32) -> Result<()> {
        self.store_flag(uid, "+FLAGS (\\Deleted)")
    }

    fn store_flag(&mut self, uid: u32, change: &str) -> Result<()> {
        self.require("change message flags", |s| s == ImapState::MailboxSelected)?;
        self.send_command(&format!("UID STORE {} {}", uid, change))?;
        Ok(())
    }

    /// Permanently remove deleted messages. The local list is left as is;
    /// call `fetch_emails` to resynchronize.
    pub fn expunge(&mut self) -> Result<()> {
        self.require("expunge", |s| s == ImapState::MailboxSelected)?;
        self.send_command("EXPUNGE")?;
        Ok(())
    }

    /// Replace the mailbox list. Returns the new mailbox count.
    pub fn list_mailboxes(&mut self) -> Result<usize> {
        self.require("list mailboxes", |s| s >= ImapState::Authenticated)?;
        self.mailboxes.clear();

        let response = self.send_command("LIST \"\" \"*\"")?;
        self.mailboxes = imapresultimpl::parse_list(&response.text());
        debug!("Listed {} mailboxes", self.mailboxes.len());
        Ok(self.mailboxes.len())
    }

    /// Query message counts of `name` and record them on its mailbox entry.
    pub fn mailbox_status(&mut self, name: &str) -> Result<Mailbox> {
        self.require("query mailbox status", |s| s >= ImapState::Authenticated)?;
        let response = self.send_command(&format!("STATUS {} (MESSAGES RECENT UNSEEN)", name))?;

        let index = match self.mailboxes.iter().position(|m| m.name == name) {
            Some(index) => index,
            None => {
                self.mailboxes.push(Mailbox::new(name));
                self.mailboxes.len() - 1
            }
        };
        let mailbox = &mut self.mailboxes[index];
        if !imapresultimpl::parse_status(&response.text(), mailbox) {
            warn!("STATUS {} returned no counts", name);
        }
        Ok(mailbox.clone())
    }

    pub fn create_mailbox(&mut self, name: &str) -> Result<()> {
        self.require("create a mailbox", |s| s >= ImapState::Authenticated)?;
        self.send_command(&format!("CREATE {}", name))?;
        Ok(())
    }

    pub fn delete_mailbox(&mut self, name: &str) -> Result<()> {
        self.require("delete a mailbox", |s| s >= ImapState::Authenticated)?;
        self.send_command(&format!("DELETE {}", name))?;
        Ok(())
    }

    /// Run `SEARCH <criteria>` and return how many messages matched.
    /// The matching set itself is not kept.
    pub fn search_emails(&mut self, criteria: &str) -> Result<usize> {
        self.require("search", |s| s == ImapState::MailboxSelected)?;
        let response = self.send_command(&format!("SEARCH {}", criteria))?;
        let count = imapresultimpl::parse_search_ids(&response.text()).len();
        debug!("SEARCH {} matched {} messages", criteria, count);
        Ok(count)
    }

    pub fn filter_by_subject(&mut self, text: &str) -> Result<usize> {
        self.search_emails(&format!("SUBJECT \"{}\"", text))
    }

    pub fn filter_by_sender(&mut self, text: &str) -> Result<usize> {
        self.search_emails(&format!("FROM \"{}\"", text))
    }

    pub fn filter_unseen(&mut self) -> Result<usize> {
        self.search_emails("UNSEEN")
    }

    /// Guess the attachments of `uid` from its BODYSTRUCTURE and record
    /// them on the matching message.
    pub fn get_attachments(&mut self, uid: u32) -> Result<Vec<Attachment>> {
        self.require("list attachments", |s| s == ImapState::MailboxSelected)?;
        let response = self.send_command(&format!("UID FETCH {} BODYSTRUCTURE", uid))?;
        let attachments = imapresultimpl::parse_attachments(&response.text());

        if let Some(email) = self.email_mut(uid) {
            email.attachments = attachments.clone();
        }
        Ok(attachments)
    }

    /// Download part `part` of `uid`, Base64-decode it and write the bytes
    /// to `dest`. Returns the number of bytes written.
    pub fn fetch_attachment(&mut self, uid: u32, part: &str, dest: &Path) -> Result<usize> {
        self.require("fetch an attachment", |s| s == ImapState::MailboxSelected)?;
        let response = self.send_command(&format!("UID FETCH {} BODY[{}]", uid, part))?;

        let payload = match imapresultimpl::extract_part_payload(&response.data) {
            Some(payload) => payload,
            None => bail!(ErrorKind::MissingBoundary),
        };
        let decoded = mime::base64_decode(payload);
        if decoded.is_empty() {
            bail!(ErrorKind::EmptyAttachment);
        }
        fs::write(dest, &decoded)?;
        info!("Saved part {} of message {} to {} ({} bytes)", part, uid, dest.display(), decoded.len());
        Ok(decoded.len())
    }

    /// Log out when logged in, close the connection and drop the message and
    /// mailbox lists. Does nothing on a session that is already closed.
    pub fn disconnect(&mut self) {
        if self.state >= ImapState::Authenticated {
            if let Err(e) = self.send_command("LOGOUT") {
                debug!("LOGOUT failed: {}", e);
            }
        }
        if let Some(mut conn) = self.conn.take() {
            conn.disconnect();
        }
        self.emails.clear();
        self.mailboxes.clear();
        self.current_mailbox = None;
        if self.state != ImapState::Disconnected {
            self.set_state(ImapState::Disconnected);
        }
    }

    fn set_state(&mut self, state: ImapState) {
        self.state = state;
        debug!("ImapState::{:?}", self.state);
    }

    fn require<F: Fn(ImapState) -> bool>(&self, operation: &'static str, allowed: F) -> Result<()> {
        ensure!(
            allowed(self.state),
            ErrorKind::InvalidState(operation, self.state.to_string())
        );
        Ok(())
    }

    fn next_tag(&mut self) -> String {
        let tag = format!("A{}", self.tag_counter);
        self.tag_counter += 1;
        tag
    }

    fn send_command(&mut self, command: &str) -> Result<ImapResponse> {
        self.send_command_masked(command, command)
    }

    /// Send `command` under a fresh tag and collect the reply. `shown` is
    /// what gets logged in place of the command.
    fn send_command_masked(&mut self, command: &str, shown: &str) -> Result<ImapResponse> {
        let tag = self.next_tag();
        info!("C: {} {}", tag, shown);
        match self.conn {
            Some(ref mut conn) => conn.write_string(&format!("{} {}", tag, command))?,
            None => bail!(ErrorKind::ConnectionClosed),
        };

        let response = self.read_response(&tag)?;
        if !response.is_ok() {
            bail!(ErrorKind::CommandRejected(response.status_line));
        }
        Ok(response)
    }

    fn read_line(&mut self) -> Result<String> {
        let conn = match self.conn {
            Some(ref mut conn) => conn,
            None => bail!(ErrorKind::ConnectionClosed),
        };
        let mut buff = Vec::new();
        if conn.recv_line(&mut buff, MAX_LINE_LEN)? == 0 {
            bail!(ErrorKind::ConnectionClosed);
        }
        Ok(String::from_utf8_lossy(&buff).into_owned())
    }

    /// Collect untagged lines until the completion line for `tag`.
    ///
    /// Lines longer than `MAX_LINE_LEN` arrive in several chunks; only a
    /// chunk that starts a line can complete the command. Untagged data past
    /// `MAX_RESPONSE_LEN` is dropped.
    fn read_response(&mut self, tag: &str) -> Result<ImapResponse> {
        let conn = match self.conn {
            Some(ref mut conn) => conn,
            None => bail!(ErrorKind::ConnectionClosed),
        };
        let mut data = Vec::new();
        let mut buff = Vec::new();
        let mut line_start = true;
        let mut overflow = false;

        loop {
            buff.clear();
            if conn.recv_line(&mut buff, MAX_LINE_LEN)? == 0 {
                bail!(ErrorKind::ConnectionClosed);
            }
            let starts_line = line_start;
            line_start = buff.last() == Some(&b'\n');

            let line = String::from_utf8_lossy(&buff);
            if starts_line {
                if let Some(status) = imapresultimpl::completion_status(&line, tag) {
                    info!("S: {}", line.trim_end());
                    return Ok(ImapResponse {
                        data: data,
                        status: status,
                        status_line: line.trim_end().to_string(),
                    });
                }
            }
            debug!("S: {}", line.trim_end());

            if overflow {
                continue;
            }
            if data.len() + buff.len() > MAX_RESPONSE_LEN {
                warn!("Response to {} exceeds {} bytes, dropping the rest", tag, MAX_RESPONSE_LEN);
                overflow = true;
                continue;
            }
            data.extend_from_slice(&buff);
        }
    }
}
