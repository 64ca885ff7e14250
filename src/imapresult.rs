use crate::html;

/// Upper bound on attachments recorded per message.
pub const MAX_ATTACHMENTS: usize = 32;

/// One message of the selected mailbox.
///
/// `uid` is only unique within that mailbox. The body fields stay `None`
/// until `ImapSession::fetch_email_body` has been called for the message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Email {
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub seen: bool,
    /// Local flag; the message is only gone after an expunge.
    pub deleted: bool,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Readable text of the message: the plain body, or the HTML body
    /// converted to text.
    pub fn text(&self) -> Option<String> {
        match (&self.body, &self.html_body) {
            (&Some(ref plain), _) => Some(plain.clone()),
            (&None, &Some(ref markup)) => Some(html::to_text(markup)),
            (&None, &None) => None,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some() || self.html_body.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub encoding: String,
    /// Section used in a `BODY[<part>]` fetch.
    pub part: String,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mailbox {
    pub name: String,
    pub exists: Option<u32>,
    pub recent: Option<u32>,
    pub unseen: Option<u32>,
}

impl Mailbox {
    pub fn new(name: &str) -> Mailbox {
        Mailbox {
            name: name.to_string(),
            ..Mailbox::default()
        }
    }

    pub fn is_inbox(&self) -> bool {
        self.name.eq_ignore_ascii_case("INBOX")
    }
}

/// Outcome keyword of a tagged completion line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapStatus {
    Ok,
    No,
    Bad,
}

/// Everything the server sent for one command.
#[derive(Debug)]
pub struct ImapResponse {
    /// Untagged lines, terminators included, in arrival order.
    pub data: Vec<u8>,
    pub status: ImapStatus,
    /// The tagged completion line without its terminator.
    pub status_line: String,
}

impl ImapResponse {
    pub fn is_ok(&self) -> bool {
        self.status == ImapStatus::Ok
    }

    /// Untagged data as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prefers_plain_body() {
        let mut email = Email::default();
        assert_eq!(email.text(), None);
        assert!(!email.has_body());

        email.html_body = Some("<p>Hi <b>there</b></p>".to_string());
        assert_eq!(email.text().unwrap(), "Hi there");

        email.body = Some("plain".to_string());
        assert_eq!(email.text().unwrap(), "plain");
    }

    #[test]
    fn inbox_match_ignores_case() {
        assert!(Mailbox::new("inbox").is_inbox());
        assert!(!Mailbox::new("Sent").is_inbox());
    }
}
