//! Channel-specific message envelopes.

use std::fmt;

const CRLF: &str = "\r\n";
const ELLIPSIS: &str = "...";

/// A minimal RFC 5322-style message: `From`, `To`, `Subject`, blank line, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Header values may not break onto new lines.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Body line breaks (`\r\n`, `\r`) become `\n`.
fn body_lines(body: &str) -> String {
    body.replace(CRLF, "\n").replace('\r', "\n")
}

/// Builds the envelope in normalized form.
///
/// Header values are trimmed and kept on one line. Body line endings are stored as `\n`,
/// written as CRLF by [`Envelope::to_raw`] and read back as `\n` by [`Envelope::parse`], so
/// parsing the raw form returns an equal envelope.
pub fn format_for_email(sender: &str, recipient: &str, subject: &str, body: &str) -> Envelope {
    Envelope {
        headers: vec![
            ("From".to_string(), header_value(sender)),
            ("To".to_string(), header_value(recipient)),
            ("Subject".to_string(), header_value(subject)),
        ],
        body: body_lines(body),
    }
}

/// SMS gateways carry no headers; the body goes out as-is.
pub fn format_for_sms(body: &str) -> String {
    body.to_string()
}

/// Cuts `body` to at most `max_chars` characters, ending in `...` when shortened.
pub fn truncate_sms(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = body.chars().take(keep).collect();
    truncated.push_str(&ELLIPSIS[..max_chars.min(ELLIPSIS.len())]);
    truncated
}

impl Envelope {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Wire form with CRLF line endings, in the body too.
    pub fn to_raw(&self) -> String {
        let mut raw = String::new();
        for (name, value) in &self.headers {
            raw.push_str(name);
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str(CRLF);
        }
        raw.push_str(CRLF);
        raw.push_str(&body_lines(&self.body).replace('\n', CRLF));
        raw
    }

    /// Reads back what [`Envelope::to_raw`] wrote, with `\n` line endings and trimmed header
    /// values. `None` without a header/body separator.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.replace(CRLF, "\n");
        let (head, body) = raw.split_once("\n\n")?;

        let headers = head
            .lines()
            .map(|line| {
                line.split_once(':')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            headers,
            body: body.to_string(),
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}
