/// Read-only cursor over a string slice.
///
/// Positions are byte offsets. Every delimiter searched for is ASCII, so any
/// position the cursor stops at is a char boundary.
pub struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(text: &'a str) -> Cursor<'a> {
        Cursor { text: text, pos: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).cloned()
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.text.len());
    }

    /// Consume and return the next char.
    pub fn next_char(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consume bytes while `pred` holds and return how many were skipped.
    pub fn skip_while<F: Fn(u8) -> bool>(&mut self, pred: F) -> usize {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
        self.pos - start
    }

    /// Return the text up to `delim` and move past it. The cursor does not
    /// move when `delim` is absent.
    pub fn read_until(&mut self, delim: &str) -> Option<&'a str> {
        let rest = self.rest();
        let idx = rest.find(delim)?;
        self.pos += idx + delim.len();
        Some(&rest[..idx])
    }
}

/// A string that silently stops growing at `capacity` bytes.
///
/// Once anything has been refused the string is full for good, so its
/// contents always stay a prefix of everything pushed.
pub struct BoundedString {
    buf: String,
    capacity: usize,
    truncated: bool,
}

impl BoundedString {
    pub fn with_capacity(capacity: usize) -> BoundedString {
        BoundedString {
            buf: String::new(),
            capacity: capacity,
            truncated: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.truncated || self.buf.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last(&self) -> Option<char> {
        self.buf.chars().last()
    }

    /// Append `c` if it fits; returns false once the capacity is reached.
    pub fn push(&mut self, c: char) -> bool {
        if self.truncated || self.buf.len() + c.len_utf8() > self.capacity {
            self.truncated = true;
            return false;
        }
        self.buf.push(c);
        true
    }

    /// Append as much of `s` as fits, cutting at a char boundary.
    pub fn push_str(&mut self, s: &str) -> bool {
        if self.truncated {
            return s.is_empty();
        }
        let room = self.capacity.saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.push_str(s);
            return true;
        }
        self.buf.push_str(truncate_at_boundary(s, room));
        self.truncated = true;
        false
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// ASCII case-insensitive prefix test.
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// ASCII case-insensitive substring search.
pub fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() || pat.len() > hay.len() {
        return None;
    }
    hay.windows(pat.len()).position(|w| w.eq_ignore_ascii_case(pat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_read_until_leaves_position_on_miss() {
        let mut cur = Cursor::new("=?UTF-8?B?abc?= tail");
        cur.advance(2);
        assert_eq!(cur.read_until("?"), Some("UTF-8"));
        assert_eq!(cur.read_until("#"), None);
        assert_eq!(cur.rest(), "B?abc?= tail");
        assert_eq!(cur.read_until("?="), Some("B?abc"));
        assert_eq!(cur.skip_while(|b| b == b' '), 1);
        assert_eq!(cur.rest(), "tail");
    }

    #[test]
    fn cursor_next_char_handles_multibyte() {
        let mut cur = Cursor::new("é!");
        assert_eq!(cur.next_char(), Some('é'));
        assert_eq!(cur.next_char(), Some('!'));
        assert_eq!(cur.next_char(), None);
        assert!(cur.is_eof());
    }

    #[test]
    fn bounded_string_truncates_on_char_boundary() {
        let mut out = BoundedString::with_capacity(4);
        assert!(out.push_str("ab"));
        assert!(!out.push_str("çé"));
        assert_eq!(out.into_string(), "abç");

        let mut out = BoundedString::with_capacity(1);
        assert!(out.push('x'));
        assert!(!out.push('y'));
        assert!(out.is_full());
    }

    #[test]
    fn refused_char_stops_further_growth() {
        let mut out = BoundedString::with_capacity(3);
        assert!(out.push_str("ab"));
        assert!(!out.push('é'));
        assert!(out.is_full());
        assert!(!out.push('c'));
        assert!(!out.push_str("d"));
        assert_eq!(out.into_string(), "ab");
    }

    #[test]
    fn case_insensitive_helpers() {
        assert!(starts_with_ignore_case("<SCRIPT type=x>", "<script"));
        assert!(!starts_with_ignore_case("<s", "<script"));
        assert_eq!(find_ignore_case("(\"ATTACHMENT\" nil)", "\"attachment\""), Some(1));
        assert_eq!(find_bytes(b"a\r\n\r\nb", b"\r\n\r\n"), Some(1));
        assert_eq!(find_bytes(b"ab", b""), None);
    }
}
