use crate::config::Config;
use crate::connection::{Connection, DEFAULT_TIMEOUT};
use crate::errors::*;
use crate::mime;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

const MAX_LINE_LEN: usize = 4096;
const EHLO_DOMAIN: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SmtpState {
    Disconnected,
    /// Greeting received.
    Connected,
    /// EHLO accepted.
    Ready,
    Authenticated,
}

impl fmt::Display for SmtpState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            SmtpState::Disconnected => "disconnected",
            SmtpState::Connected => "waiting for EHLO",
            SmtpState::Ready => "not authenticated",
            SmtpState::Authenticated => "authenticated",
        };
        f.write_str(s)
    }
}

/// A complete, possibly multi-line, server reply.
#[derive(Debug)]
pub struct SmtpReply {
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// The line carrying the final status.
    pub fn last_line(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    pub fn code(&self) -> u16 {
        reply_code(self.last_line())
    }

    pub fn is(&self, expected: u16) -> bool {
        response_ok(self.last_line(), expected)
    }
}

/// Leading decimal digits of `line` as a number; 0 when there are none.
fn reply_code(line: &str) -> u16 {
    line.trim_start()
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .take(3)
        .fold(0, |code, b| code * 10 + u16::from(b - b'0'))
}

/// Accept `line` when its code equals `expected`. An expected code of the
/// form `x00` accepts the whole class, so 200 takes any 2xx reply while 250
/// does not take 251.
pub fn response_ok(line: &str, expected: u16) -> bool {
    let code = reply_code(line);
    code == expected || (expected % 100 == 0 && code / 100 == expected / 100)
}

/// A session with one submission server. Delivers one message per call.
pub struct SmtpSession {
    conn: Option<Connection>,
    state: SmtpState,
}

impl SmtpSession {
    pub fn connect(host: &str, port: u16, use_tls: bool) -> Result<SmtpSession> {
        SmtpSession::connect_timeout(host, port, use_tls, Some(DEFAULT_TIMEOUT))
    }

    /// Connect, expect the 220 greeting and introduce ourselves with EHLO.
    pub fn connect_timeout(host: &str, port: u16, use_tls: bool, timeout: Option<Duration>) -> Result<SmtpSession> {
        trace!("Initiate SMTP Connection");
        let conn = Connection::connect(host, port, use_tls, timeout)?;
        let mut session = SmtpSession {
            conn: Some(conn),
            state: SmtpState::Disconnected,
        };

        let greeting = session.read_reply()?;
        if !greeting.is(220) {
            session.close();
            bail!(ErrorKind::CommandRejected(greeting.last_line().to_string()));
        }
        session.set_state(SmtpState::Connected);

        if let Err(e) = session.ehlo() {
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Connect to the configured server, upgrade with STARTTLS when asked to
    /// and authenticate when a username is configured.
    pub fn open(config: &Config) -> Result<SmtpSession> {
        let mut session = SmtpSession::connect_timeout(
            &config.smtp_server,
            config.smtp_port,
            config.smtp_use_ssl,
            config.timeout(),
        )?;
        if config.smtp_use_starttls && !session.uses_tls() {
            session.starttls()?;
        }
        if !config.smtp_username.is_empty() {
            session.auth_login(&config.smtp_username, &config.smtp_password)?;
        }
        Ok(session)
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state >= SmtpState::Ready
    }

    pub fn uses_tls(&self) -> bool {
        self.conn.as_ref().map_or(false, Connection::uses_tls)
    }

    fn ehlo(&mut self) -> Result<()> {
        self.command(&format!("EHLO {}", EHLO_DOMAIN), 250)?;
        self.set_state(SmtpState::Ready);
        Ok(())
    }

    /// Switch the connection to TLS and repeat EHLO.
    pub fn starttls(&mut self) -> Result<()> {
        self.require("start TLS", |s| s == SmtpState::Ready)?;
        self.command("STARTTLS", 220)?;
        match self.conn {
            Some(ref mut conn) => conn.starttls()?,
            None => bail!(ErrorKind::ConnectionClosed),
        }
        self.ehlo()
    }

    /// AUTH LOGIN exchange. A failure at any step aborts without retrying.
    pub fn auth_login(&mut self, username: &str, password: &str) -> Result<()> {
        self.require("authenticate", |s| s == SmtpState::Ready)?;
        trace!("Attempting to Login");
        self.command("AUTH LOGIN", 334)?;
        self.command_masked(&mime::base64_encode(username.as_bytes()), "****", 334)?;
        self.command_masked(&mime::base64_encode(password.as_bytes()), "****", 235)?;
        self.set_state(SmtpState::Authenticated);
        Ok(())
    }

    /// Deliver one message. Any rejected step aborts the transaction as is.
    pub fn send_email(&mut self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        self.require("send mail", |s| s == SmtpState::Authenticated)?;
        self.command(&format!("MAIL FROM:<{}>", from), 250)?;
        self.command(&format!("RCPT TO:<{}>", to), 250)?;
        self.command("DATA", 354)?;

        let message = format_message(from, to, subject, body, Utc::now());
        info!("C: <message, {} bytes>", message.len());
        match self.conn {
            Some(ref mut conn) => conn.send(message.as_bytes())?,
            None => bail!(ErrorKind::ConnectionClosed),
        };
        self.expect(250)?;
        info!("Message to {} accepted", to);
        Ok(())
    }

    /// Say QUIT when the server has accepted us, then close the connection.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            let quit = self.write_line("QUIT", "QUIT").and_then(|_| self.read_reply());
            if let Err(e) = quit {
                debug!("QUIT failed: {}", e);
            }
        }
        self.close();
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.disconnect();
        }
        if self.state != SmtpState::Disconnected {
            self.set_state(SmtpState::Disconnected);
        }
    }

    fn set_state(&mut self, state: SmtpState) {
        self.state = state;
        debug!("SmtpState::{:?}", self.state);
    }

    fn require<F: Fn(SmtpState) -> bool>(&self, operation: &'static str, allowed: F) -> Result<()> {
        ensure!(
            allowed(self.state),
            ErrorKind::InvalidState(operation, self.state.to_string())
        );
        Ok(())
    }

    fn command(&mut self, line: &str, expected: u16) -> Result<SmtpReply> {
        self.command_masked(line, line, expected)
    }

    fn command_masked(&mut self, line: &str, shown: &str, expected: u16) -> Result<SmtpReply> {
        self.write_line(line, shown)?;
        self.expect(expected)
    }

    fn write_line(&mut self, line: &str, shown: &str) -> Result<()> {
        info!("C: {}", shown);
        match self.conn {
            Some(ref mut conn) => conn.write_string(line)?,
            None => bail!(ErrorKind::ConnectionClosed),
        };
        Ok(())
    }

    fn expect(&mut self, expected: u16) -> Result<SmtpReply> {
        let reply = self.read_reply()?;
        if !reply.is(expected) {
            warn!("Expected {} but got: {}", expected, reply.last_line());
            bail!(ErrorKind::CommandRejected(reply.last_line().to_string()));
        }
        Ok(reply)
    }

    /// Read lines while the fourth character marks a continuation (`250-...`).
    fn read_reply(&mut self) -> Result<SmtpReply> {
        let conn = match self.conn {
            Some(ref mut conn) => conn,
            None => bail!(ErrorKind::ConnectionClosed),
        };
        let mut lines = Vec::new();
        let mut buff = Vec::new();

        loop {
            buff.clear();
            if conn.recv_line(&mut buff, MAX_LINE_LEN)? == 0 {
                bail!(ErrorKind::ConnectionClosed);
            }
            let line = String::from_utf8_lossy(&buff).trim_end().to_string();
            info!("S: {}", line);
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);
            if !more {
                return Ok(SmtpReply { lines: lines });
            }
        }
    }
}

/// Render the DATA payload: headers, a blank line, the dot-stuffed body and
/// the terminating `.` line.
pub fn format_message(from: &str, to: &str, subject: &str, body: &str, date: DateTime<Utc>) -> String {
    let mut message = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\n\r\n",
        from,
        to,
        mime::encode_header(subject),
        date.format("%a, %d %b %Y %H:%M:%S +0000")
    );

    let body = body.strip_suffix('\n').map_or(body, |b| b.strip_suffix('\r').unwrap_or(b));
    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            message.push('.');
        }
        message.push_str(line);
        message.push_str("\r\n");
    }
    message.push_str(".\r\n");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exact_code_or_bare_class_is_accepted() {
        assert!(response_ok("250 OK", 250));
        assert!(!response_ok("550 Denied", 250));
        assert!(!response_ok("251 Forwarded", 250));
        assert!(response_ok("251 Forwarded", 200));
        assert!(response_ok("334 VXNlcm5hbWU6", 334));
        assert!(!response_ok("", 220));
        assert!(!response_ok("garbage", 250));
    }

    #[test]
    fn reply_uses_last_line_of_multiline_response() {
        let reply = SmtpReply {
            lines: vec![
                "250-mail.example.com".to_string(),
                "250-STARTTLS".to_string(),
                "250 AUTH LOGIN PLAIN".to_string(),
            ],
        };
        assert_eq!(reply.code(), 250);
        assert!(reply.is(250));
        assert_eq!(reply.last_line(), "250 AUTH LOGIN PLAIN");
    }

    #[test]
    fn message_has_headers_and_terminator() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap();
        let message = format_message("me@example.com", "you@example.com", "Hi", "Hello\nthere", date);
        assert_eq!(
            message,
            "From: me@example.com\r\n\
             To: you@example.com\r\n\
             Subject: Hi\r\n\
             Date: Tue, 05 Mar 2024 09:07:01 +0000\r\n\
             \r\n\
             Hello\r\n\
             there\r\n\
             .\r\n"
        );
    }

    #[test]
    fn body_lines_starting_with_dot_are_stuffed() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = format_message("a@b", "c@d", "s", ".\r\n..x\r\nend\r\n", date);
        assert!(message.ends_with("\r\n\r\n..\r\n...x\r\nend\r\n.\r\n"));
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = format_message("a@b", "c@d", "Grüße", "x", date);
        assert!(message.contains("Subject: =?UTF-8?B?R3LDvMOfZQ==?=\r\n"));
    }
}
