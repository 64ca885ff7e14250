use crate::imapresult::{Attachment, Email, ImapStatus, Mailbox, MAX_ATTACHMENTS};
use crate::mime;
use crate::utils::{find_bytes, find_ignore_case, starts_with_ignore_case};
use regex::Regex;

pub const MAX_SUBJECT_LEN: usize = 256;
pub const MAX_FROM_LEN: usize = 128;
pub const MAX_TO_LEN: usize = 256;
pub const MAX_DATE_LEN: usize = 64;
pub const MAX_BODY_LEN: usize = 256 * 1024;

pub const NO_SUBJECT: &str = "(No subject)";
pub const UNKNOWN_SENDER: &str = "(Unknown)";
pub const EMPTY_MESSAGE: &str = "(Empty message)";

const ATTACHMENT_MARKER: &str = "\"attachment\"";
const FILENAME_MARKER: &str = "\"filename\"";

lazy_static! {
    static ref UID_REGEX: Regex = Regex::new(r"\bUID (?P<uid>\d+)").unwrap();
    static ref COUNT_REGEX: Regex = Regex::new(r"(?i)^\* (?P<n>\d+) (?P<kind>EXISTS|RECENT)\b").unwrap();
    static ref STATUS_ITEM_REGEX: Regex = Regex::new(r"(?i)\b(?P<item>MESSAGES|RECENT|UNSEEN) (?P<n>\d+)").unwrap();
}

/// Check whether `line` completes the command tagged `tag`.
pub fn completion_status(line: &str, tag: &str) -> Option<ImapStatus> {
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let keyword = rest.split_whitespace().next()?;
    if keyword.eq_ignore_ascii_case("OK") {
        Some(ImapStatus::Ok)
    } else if keyword.eq_ignore_ascii_case("NO") {
        Some(ImapStatus::No)
    } else if keyword.eq_ignore_ascii_case("BAD") {
        Some(ImapStatus::Bad)
    } else {
        None
    }
}

fn parse_uid(line: &str) -> Option<u32> {
    UID_REGEX.captures(line).and_then(|cap| cap["uid"].parse().ok())
}

/// Lines closing a FETCH item list: a short `)` line, or a trailing
/// ` UID n)` / ` FLAGS (...))` line some servers send after the literal.
fn is_fetch_terminator(line: &str) -> bool {
    let t = line.trim();
    (t.len() < 5 && t.contains(')'))
        || (t.ends_with(')') && (t.starts_with("UID ") || t.starts_with("FLAGS ")))
}

/// Build the message list from a `FETCH (UID FLAGS BODY.PEEK[HEADER.FIELDS ...])`
/// response. Line based: literal lengths are not honoured.
pub fn parse_fetch_headers(text: &str) -> Vec<Email> {
    let lines: Vec<&str> = text.lines().collect();
    let mut emails = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if !line.contains("FETCH") {
            continue;
        }

        let mut email = Email::default();
        email.uid = parse_uid(line).unwrap_or(0);
        email.seen = line.contains("\\Seen");
        email.deleted = line.contains("\\Deleted");

        let mut header = String::new();
        while i < lines.len() {
            let l = lines[i];
            if l.starts_with("* ") {
                break;
            }
            i += 1;
            if is_fetch_terminator(l) {
                if email.uid == 0 {
                    email.uid = parse_uid(l).unwrap_or(0);
                }
                email.seen |= l.contains("\\Seen");
                email.deleted |= l.contains("\\Deleted");
                break;
            }
            header.push_str(l);
            header.push_str("\r\n");
        }

        parse_header_block(&header, &mut email);
        if email.subject.is_empty() {
            email.subject = NO_SUBJECT.to_string();
        }
        if email.from.is_empty() {
            email.from = UNKNOWN_SENDER.to_string();
        }
        emails.push(email);
    }
    emails
}

#[derive(Clone, Copy)]
enum Field {
    Subject,
    From,
    To,
    Date,
}

fn header_field(line: &str) -> Option<(Field, &str)> {
    let fields = [
        ("Subject:", Field::Subject),
        ("From:", Field::From),
        ("To:", Field::To),
        ("Date:", Field::Date),
    ];
    fields
        .iter()
        .find(|&&(prefix, _)| starts_with_ignore_case(line, prefix))
        .map(|&(prefix, field)| (field, &line[prefix.len()..]))
}

/// Fill subject, sender, recipient and date from a raw header block.
/// Folded continuation lines are joined onto their field.
pub fn parse_header_block(block: &str, email: &mut Email) {
    let mut lines = block.lines().filter(|l| !l.is_empty()).peekable();

    while let Some(line) = lines.next() {
        let (field, first) = match header_field(line) {
            Some(found) => found,
            None => continue,
        };
        let mut value = first.to_string();
        while let Some(next) = lines.peek() {
            if !(next.starts_with(' ') || next.starts_with('\t')) {
                break;
            }
            value.push_str(next);
            lines.next();
        }

        let value = value.trim();
        match field {
            Field::Subject => email.subject = mime::decode_header_bounded(value, MAX_SUBJECT_LEN),
            Field::From => email.from = mime::decode_header_bounded(value, MAX_FROM_LEN),
            Field::To => email.to = mime::decode_header_bounded(value, MAX_TO_LEN),
            Field::Date => email.date = mime::decode_header_bounded(value, MAX_DATE_LEN),
        }
    }
}

/// Bytes of the `{n}` literal announced on the line containing `marker`.
fn literal_after<'a>(data: &'a [u8], marker: &[u8]) -> Option<&'a [u8]> {
    let at = find_bytes(data, marker)?;
    let line_end = at + find_bytes(&data[at..], b"\n")?;
    let announce = &data[at..line_end];
    let open = announce.iter().rposition(|&b| b == b'{')?;
    let close = open + announce[open..].iter().position(|&b| b == b'}')?;
    let len: usize = ::std::str::from_utf8(&announce[open + 1..close]).ok()?.parse().ok()?;
    let start = line_end + 1;
    let end = start.checked_add(len)?.min(data.len());
    Some(&data[start..end])
}

fn after_blank_line(data: &[u8]) -> Option<&[u8]> {
    find_bytes(data, b"\r\n\r\n").map(|p| &data[p + 4..])
}

/// Body text of a `UID FETCH <uid> BODY[TEXT]` response, sanitized.
pub fn extract_body(data: &[u8]) -> String {
    let raw = match literal_after(data, b"BODY[TEXT]").or_else(|| after_blank_line(data)) {
        Some(raw) => raw,
        None => return EMPTY_MESSAGE.to_string(),
    };
    let raw = &raw[..raw.len().min(MAX_BODY_LEN)];

    let end = raw
        .iter()
        .rposition(|&b| !(b == b')' || b == b'\r' || b == b'\n' || b == b' '))
        .map_or(0, |p| p + 1);
    let raw = &raw[..end];
    let begin = raw
        .iter()
        .position(|&b| !(b == b' ' || b == b'\t' || b == b'\r' || b == b'\n'))
        .unwrap_or(raw.len());
    let raw = &raw[begin..];

    if raw.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }
    mime::sanitize(raw)
}

/// Encoded payload of a `UID FETCH <uid> BODY[<part>]` response.
pub fn extract_part_payload(data: &[u8]) -> Option<&[u8]> {
    literal_after(data, b"BODY[").or_else(|| after_blank_line(data))
}

fn last_token(line: &str) -> Option<&str> {
    let t = line.trim_end();
    let name = if t.ends_with('"') {
        let inner = &t[..t.len() - 1];
        &inner[inner.rfind('"')? + 1..]
    } else {
        t.rsplit(' ').next()?
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Mailbox names from `* LIST` lines. `INBOX` is always present.
pub fn parse_list(text: &str) -> Vec<Mailbox> {
    let mut mailboxes: Vec<Mailbox> = text
        .lines()
        .filter(|line| starts_with_ignore_case(line, "* LIST "))
        .filter_map(last_token)
        .map(Mailbox::new)
        .collect();
    if !mailboxes.iter().any(Mailbox::is_inbox) {
        mailboxes.insert(0, Mailbox::new("INBOX"));
    }
    mailboxes
}

/// Message numbers listed on the `* SEARCH` line.
pub fn parse_search_ids(text: &str) -> Vec<u32> {
    for line in text.lines() {
        if starts_with_ignore_case(line, "* SEARCH") {
            return line["* SEARCH".len()..]
                .split_whitespace()
                .take_while(|token| token.bytes().all(|b| b.is_ascii_digit()))
                .filter_map(|token| token.parse().ok())
                .collect();
        }
    }
    Vec::new()
}

/// Record `EXISTS`/`RECENT` counts reported by SELECT.
pub fn parse_select_counts(text: &str, mailbox: &mut Mailbox) {
    for line in text.lines() {
        if let Some(cap) = COUNT_REGEX.captures(line) {
            let n = cap["n"].parse().ok();
            if cap["kind"].eq_ignore_ascii_case("EXISTS") {
                mailbox.exists = n;
            } else {
                mailbox.recent = n;
            }
        }
    }
}

/// Apply a `* STATUS name (MESSAGES n RECENT n UNSEEN n)` line. Returns false
/// when the response carried no STATUS data.
pub fn parse_status(text: &str, mailbox: &mut Mailbox) -> bool {
    let line = match text.lines().find(|l| starts_with_ignore_case(l, "* STATUS ")) {
        Some(line) => line,
        None => return false,
    };
    let items = match line.rfind('(') {
        Some(open) => &line[open..],
        None => return false,
    };
    for cap in STATUS_ITEM_REGEX.captures_iter(items) {
        let n = cap["n"].parse().ok();
        match cap["item"].to_ascii_uppercase().as_str() {
            "MESSAGES" => mailbox.exists = n,
            "RECENT" => mailbox.recent = n,
            _ => mailbox.unseen = n,
        }
    }
    true
}

fn quoted_after(region: &str, key: &str) -> Option<String> {
    let at = find_ignore_case(region, key)?;
    let rest = &region[at + key.len()..];
    let rest = &rest[rest.find('"')? + 1..];
    let value = &rest[..rest.find('"')?];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Locate attachments in a BODYSTRUCTURE response by their `"attachment"`
/// disposition. Parts are numbered in order of appearance starting at 1;
/// type and transfer encoding are not read from the structure.
pub fn parse_attachments(text: &str) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    let mut pos = 0;

    while attachments.len() < MAX_ATTACHMENTS {
        let found = match find_ignore_case(&text[pos..], ATTACHMENT_MARKER) {
            Some(i) => pos + i,
            None => break,
        };
        let after = found + ATTACHMENT_MARKER.len();
        let region_end = find_ignore_case(&text[after..], ATTACHMENT_MARKER).map_or(text.len(), |i| after + i);
        let n = attachments.len() + 1;

        let filename = match quoted_after(&text[after..region_end], FILENAME_MARKER) {
            Some(name) => mime::decode_header(&name),
            None => format!("attachment_{}", n),
        };
        attachments.push(Attachment {
            filename: filename,
            mime_type: "application/octet-stream".to_string(),
            encoding: "base64".to_string(),
            part: n.to_string(),
            size: None,
        });
        pos = after;
    }
    attachments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_recognised_by_tag_and_keyword() {
        let lines = ["* 1 EXISTS\r\n", "A1 OK LOGIN completed\r\n"];
        assert_eq!(completion_status(lines[0], "A1"), None);
        assert_eq!(completion_status(lines[1], "A1"), Some(ImapStatus::Ok));
        assert_eq!(completion_status("A1 NO LOGIN failed\r\n", "A1"), Some(ImapStatus::No));
        assert_eq!(completion_status("A1 BAD syntax\r\n", "A1"), Some(ImapStatus::Bad));
        assert_eq!(completion_status("A10 OK done\r\n", "A1"), None);
        assert_eq!(completion_status("A1 OKAY\r\n", "A1"), None);
    }

    const FETCH_RESPONSE: &str = "* 1 FETCH (UID 101 FLAGS (\\Seen) BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {97}\r\n\
        Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n \
        =?UTF-8?B?IG1lbnU=?=\r\n\
        From: Alice <alice@example.com>\r\n\
        Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
        \r\n\
        )\r\n\
        * 2 FETCH (UID 102 FLAGS () BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {2}\r\n\
        \r\n\
        )\r\n\
        * 3 FETCH (FLAGS (\\Deleted) BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {30}\r\n\
        From: bob@example.com\r\n\
        \r\n \
        UID 103)\r\n";

    #[test]
    fn fetch_headers_are_parsed_with_placeholders() {
        let emails = parse_fetch_headers(FETCH_RESPONSE);
        assert_eq!(emails.len(), 3);

        assert_eq!(emails[0].uid, 101);
        assert!(emails[0].seen);
        assert_eq!(emails[0].subject, "Café menu");
        assert_eq!(emails[0].from, "Alice <alice@example.com>");
        assert_eq!(emails[0].date, "Mon, 1 Jan 2024 10:00:00 +0000");
        assert!(emails[0].body.is_none());

        assert_eq!(emails[1].uid, 102);
        assert!(!emails[1].seen);
        assert_eq!(emails[1].subject, NO_SUBJECT);
        assert_eq!(emails[1].from, UNKNOWN_SENDER);

        assert_eq!(emails[2].uid, 103);
        assert!(emails[2].deleted);
        assert_eq!(emails[2].from, "bob@example.com");

        for email in &emails {
            assert!(!email.subject.is_empty());
            assert!(!email.from.is_empty());
        }
    }

    #[test]
    fn fetch_without_literal_does_not_swallow_next_message() {
        let text = "* 1 FETCH (UID 7 FLAGS ())\r\n* 2 FETCH (UID 8 FLAGS (\\Seen))\r\n";
        let emails = parse_fetch_headers(text);
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[1].uid, 8);
        assert!(emails[1].seen);
    }

    #[test]
    fn body_is_read_from_literal() {
        let data = b"* 1 FETCH (UID 5 BODY[TEXT] {14}\r\nHello\r\nWorld\r\n FLAGS (\\Seen))\r\n";
        assert_eq!(extract_body(data), "Hello\r\nWorld");
    }

    #[test]
    fn body_falls_back_to_blank_line_boundary() {
        let data = b"* 1 FETCH (UID 5 BODY[TEXT] NIL\r\n\r\n  Some text  \r\n)\r\n";
        assert_eq!(extract_body(data), "Some text");
    }

    #[test]
    fn body_placeholder_when_missing_or_empty() {
        assert_eq!(extract_body(b"* 1 FETCH (UID 5)\r\n"), EMPTY_MESSAGE);
        assert_eq!(extract_body(b"* 1 FETCH (UID 5 BODY[TEXT] {0}\r\n)\r\n"), EMPTY_MESSAGE);
    }

    #[test]
    fn oversized_literal_count_is_ignored() {
        let data = b"* 1 FETCH (UID 5 BODY[TEXT] {18446744073709551615}\r\nhi\r\n)\r\n";
        assert_eq!(extract_body(data), EMPTY_MESSAGE);

        let data = b"* 1 FETCH (UID 5 BODY[TEXT] {99999999999999999999}\r\nhi\r\n)\r\n";
        assert_eq!(extract_body(data), EMPTY_MESSAGE);

        let part = b"* 1 FETCH (UID 9 BODY[2] {18446744073709551615}\r\nSGVsbG8=\r\n)\r\n";
        assert!(extract_part_payload(part).is_none());
    }

    #[test]
    fn body_is_sanitized() {
        let data = b"* 1 FETCH (UID 5 BODY[TEXT] {6}\r\nA\x01B\xffC\r\n)\r\n";
        assert_eq!(extract_body(data), "A BC");
    }

    #[test]
    fn list_takes_last_token_and_adds_inbox() {
        let text = "* LIST (\\HasNoChildren) \"/\" \"Sent Items\"\r\n\
                    * LIST (\\HasNoChildren) \"/\" Drafts\r\n\
                    * LSUB () \"/\" \"Ignored\"\r\n";
        let mailboxes = parse_list(text);
        let names: Vec<&str> = mailboxes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["INBOX", "Sent Items", "Drafts"]);

        let with_inbox = parse_list("* LIST () \".\" \"Archive\"\r\n* LIST () \".\" \"INBOX\"\r\n");
        assert_eq!(with_inbox.len(), 2);
        assert_eq!(with_inbox[1].name, "INBOX");
    }

    #[test]
    fn search_ids_stop_at_first_non_number() {
        assert_eq!(parse_search_ids("* SEARCH 2 4 9\r\n"), vec![2, 4, 9]);
        assert_eq!(parse_search_ids("* SEARCH\r\n"), Vec::<u32>::new());
        assert_eq!(parse_search_ids("* SEARCH 3 (MODSEQ 12)\r\n"), vec![3]);
        assert!(parse_search_ids("* 3 EXISTS\r\n").is_empty());
    }

    #[test]
    fn select_and_status_counts() {
        let mut mailbox = Mailbox::new("INBOX");
        parse_select_counts("* FLAGS (\\Seen)\r\n* 12 EXISTS\r\n* 2 RECENT\r\n* OK [UIDNEXT 40]\r\n", &mut mailbox);
        assert_eq!(mailbox.exists, Some(12));
        assert_eq!(mailbox.recent, Some(2));

        let mut archive = Mailbox::new("Archive");
        assert!(parse_status("* STATUS Archive (MESSAGES 231 RECENT 0 UNSEEN 5)\r\n", &mut archive));
        assert_eq!(archive.exists, Some(231));
        assert_eq!(archive.recent, Some(0));
        assert_eq!(archive.unseen, Some(5));
        assert!(!parse_status("* OK nothing\r\n", &mut archive));
    }

    #[test]
    fn attachments_are_found_by_disposition() {
        let text = "* 1 FETCH (UID 9 BODYSTRUCTURE ((\"text\" \"plain\" (\"charset\" \"utf-8\") NIL NIL \"7bit\" 12 1 NIL NIL NIL)\
                    (\"application\" \"pdf\" (\"name\" \"report.pdf\") NIL NIL \"base64\" 4000 NIL (\"attachment\" (\"filename\" \"report.pdf\")) NIL)\
                    (\"image\" \"png\" NIL NIL NIL \"base64\" 800 NIL (\"ATTACHMENT\" NIL) NIL) \"mixed\"))\r\n";
        let attachments = parse_attachments(text);
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename, "report.pdf");
        assert_eq!(attachments[0].part, "1");
        assert_eq!(attachments[0].mime_type, "application/octet-stream");
        assert_eq!(attachments[0].encoding, "base64");
        assert_eq!(attachments[1].filename, "attachment_2");
        assert_eq!(attachments[1].part, "2");
        assert!(attachments[1].size.is_none());
    }

    #[test]
    fn part_payload_prefers_literal() {
        let data = b"* 1 FETCH (UID 9 BODY[2] {8}\r\nSGVsbG8=\r\n)\r\n";
        assert_eq!(extract_part_payload(data), Some(&b"SGVsbG8="[..]));
        assert!(extract_part_payload(b"* 1 FETCH (UID 9 BODY[2] NIL)\r\n").is_none());
    }
}
