//! HTML to plain text conversion for message display.

use crate::utils::{starts_with_ignore_case, BoundedString};

/// Capacity of converted text.
pub const MAX_TEXT_LEN: usize = 256 * 1024;

static HTML_MARKERS: &[&str] = &[
    "<html", "<HTML", "<body", "<BODY", "<div", "<DIV", "<p", "<P", "<br", "<BR", "<table",
    "<TABLE", "<!DOCTYPE", "<!doctype",
];

static NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&amp;", "&"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&ndash;", "-"),
    ("&mdash;", "--"),
    ("&hellip;", "..."),
    ("&copy;", "(c)"),
    ("&reg;", "(R)"),
    ("&trade;", "(TM)"),
    ("&deg;", "°"),
    ("&plusmn;", "±"),
    ("&para;", "¶"),
    ("&sect;", "§"),
    ("&bull;", "•"),
    ("&middot;", "·"),
    ("&laquo;", "«"),
    ("&raquo;", "»"),
];

/// Tags that end a visual line.
static BLOCK_TAGS: &[&str] = &["<br", "<p", "</p", "<div", "</div", "<li", "<tr", "</tr"];

pub fn is_html(content: &str) -> bool {
    HTML_MARKERS.iter().any(|marker| content.contains(marker))
}

/// Convert `content` to plain text; non-HTML input is returned as is.
pub fn to_text(content: &str) -> String {
    if !is_html(content) {
        let mut out = BoundedString::with_capacity(MAX_TEXT_LEN);
        out.push_str(content);
        return out.into_string();
    }
    strip_tags(content)
}

/// Drop markup, keep text.
///
/// `<script>` and `<style>` bodies are discarded. Block-level tags put a
/// newline in place of the tag. Runs of whitespace in text collapse to one
/// space and carriage returns disappear. Entities are decoded last and the
/// result is trimmed.
pub fn strip_tags(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = BoundedString::with_capacity(MAX_TEXT_LEN);
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut add_newline = false;
    let mut i = 0;

    while i < bytes.len() && !out.is_full() {
        match bytes[i] {
            b'<' => {
                in_tag = true;
                let rest = &html[i..];
                if starts_with_ignore_case(rest, "<script") {
                    in_script = true;
                } else if starts_with_ignore_case(rest, "</script") {
                    in_script = false;
                } else if starts_with_ignore_case(rest, "<style") {
                    in_style = true;
                } else if starts_with_ignore_case(rest, "</style") {
                    in_style = false;
                } else if BLOCK_TAGS.iter().any(|tag| starts_with_ignore_case(rest, tag)) {
                    add_newline = true;
                }
                i += 1;
            }
            b'>' => {
                in_tag = false;
                if add_newline && !in_script && !in_style {
                    out.push('\n');
                    add_newline = false;
                }
                i += 1;
            }
            _ if !in_tag && !in_script && !in_style => {
                let c = match html[i..].chars().next() {
                    Some(c) => c,
                    None => break,
                };
                i += c.len_utf8();
                if c == '\r' {
                    continue;
                }
                if c.is_whitespace() {
                    if out.last().map_or(false, |prev| !prev.is_whitespace()) {
                        out.push(' ');
                    }
                } else {
                    out.push(c);
                }
            }
            _ => i += 1,
        }
    }

    decode_entities(&out.into_string()).trim().to_string()
}

/// Replace the common named entities and `&#NN;` / `&#xHH;` references in
/// the range 1..=255. Anything unrecognised stays as written.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        if let Some(&(name, value)) = NAMED_ENTITIES.iter().find(|&&(name, _)| rest.starts_with(name)) {
            out.push_str(value);
            rest = &rest[name.len()..];
        } else if let Some((c, len)) = numeric_entity(rest) {
            out.push(c);
            rest = &rest[len..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

fn numeric_entity(s: &str) -> Option<(char, usize)> {
    let body = s.strip_prefix("&#")?;
    let (digits, radix, skip) = match body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
        Some(hex) => (hex, 16, 3),
        None => (body, 10, 2),
    };
    let end = digits.find(';')?;
    let code = u32::from_str_radix(&digits[..end], radix).ok()?;
    if code == 0 || code > 255 {
        return None;
    }
    Some((char::from(code as u8), skip + end + 1))
}
