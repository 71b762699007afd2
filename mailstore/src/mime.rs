//! Incoming messages and their decomposition into storable parts
//!
//! [`WireMessage`] is what the sync driver hands to the store: headers, flags
//! and an undecoded body. A [`MessageDecomposer`] turns it into text, html
//! and attachment parts. [`MailparseDecomposer`] is the default.

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::{from_millis, Address, FlagSet, HeaderField};
use crate::threading::extract_message_id;

/// Where an attachment's bytes currently are
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    /// Decoded payload in hand
    Bytes(Vec<u8>),
    /// Already materialised in the attachment store under this locator
    Stored(String),
    /// Not downloaded; `store_data` tells the driver how to fetch it later
    Remote,
}

/// One attachment part of a decomposed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    /// Row id when the part was rebuilt from the local store
    pub attachment_id: Option<i64>,
    pub mime_type: String,
    /// `name` parameter of the Content-Type
    pub name: Option<String>,
    /// Raw Content-Disposition value including parameters
    pub content_disposition: Option<String>,
    pub content_id: Option<String>,
    /// Known size, if the payload is not in hand
    pub size: Option<u64>,
    pub store_data: Option<String>,
    pub content: AttachmentContent,
}

/// Text, html and attachments of a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposed {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentPart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Headers only
    Empty,
    /// Raw RFC 822 bytes (headers included)
    Mime(Vec<u8>),
    /// Parts already decomposed, e.g. rebuilt from the local store
    Local(Decomposed),
}

/// A message as received from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub uid: Option<String>,
    pub flags: FlagSet,
    pub internal_date: Option<DateTime<Utc>>,
    pub headers: Vec<HeaderField>,
    pub body: MessageBody,
}

impl WireMessage {
    pub fn new(uid: Option<String>) -> Self {
        Self {
            uid,
            flags: FlagSet::new(),
            internal_date: None,
            headers: Vec::new(),
            body: MessageBody::Empty,
        }
    }

    /// Parse raw RFC 822 bytes; the bytes are kept as the body
    pub fn from_rfc822(uid: Option<String>, raw: &[u8]) -> Result<Self> {
        let (headers, _) = mailparse::parse_headers(raw)?;
        let headers = headers
            .iter()
            .map(|h| HeaderField::new(h.get_key(), h.get_value()))
            .collect();

        Ok(Self {
            uid,
            flags: FlagSet::new(),
            internal_date: None,
            headers,
            body: MessageBody::Mime(raw.to_vec()),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_body(mut self, body: MessageBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_internal_date(mut self, date: DateTime<Utc>) -> Self {
        self.internal_date = Some(date);
        self
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn message_id(&self) -> Option<String> {
        self.header("Message-ID").and_then(extract_message_id)
    }

    pub fn subject(&self) -> Option<String> {
        self.header("Subject").map(str::to_string)
    }

    pub fn sent_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.header("Date")?;
        match mailparse::dateparse(raw) {
            Ok(secs) => from_millis(secs.saturating_mul(1000)),
            Err(e) => {
                tracing::debug!(date = raw, error = %e, "Unparseable Date header");
                None
            }
        }
    }

    pub fn from(&self) -> Vec<Address> {
        self.addresses("From")
    }

    pub fn to(&self) -> Vec<Address> {
        self.addresses("To")
    }

    pub fn cc(&self) -> Vec<Address> {
        self.addresses("Cc")
    }

    pub fn bcc(&self) -> Vec<Address> {
        self.addresses("Bcc")
    }

    pub fn reply_to(&self) -> Vec<Address> {
        self.addresses("Reply-To")
    }

    /// Content-Type without parameters, lower-cased
    pub fn mime_type(&self) -> String {
        self.header("Content-Type")
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    fn addresses(&self, name: &str) -> Vec<Address> {
        let mut out = Vec::new();
        for header in self.headers.iter().filter(|h| h.name.eq_ignore_ascii_case(name)) {
            let Ok(list) = mailparse::addrparse(&header.value) else {
                continue;
            };
            for addr in list.iter() {
                match addr {
                    mailparse::MailAddr::Single(info) => out.push(Address {
                        email: info.addr.clone(),
                        name: info.display_name.clone(),
                    }),
                    mailparse::MailAddr::Group(group) => {
                        out.extend(group.addrs.iter().map(|info| Address {
                            email: info.addr.clone(),
                            name: info.display_name.clone(),
                        }))
                    }
                }
            }
        }
        out
    }
}

/// Turns a message into storable parts
pub trait MessageDecomposer: Send + Sync {
    fn decompose(&self, message: &WireMessage) -> Result<Decomposed>;

    /// Variant for locally composed drafts. Text and html are kept exactly as
    /// written so values derived from them stay valid.
    fn decompose_draft(&self, message: &WireMessage) -> Result<Decomposed> {
        self.decompose(message)
    }
}

/// Decomposer backed by `mailparse`
#[derive(Debug, Clone, Copy, Default)]
pub struct MailparseDecomposer;

impl MailparseDecomposer {
    fn split(&self, message: &WireMessage) -> Result<Decomposed> {
        match &message.body {
            MessageBody::Empty => Ok(Decomposed::default()),
            MessageBody::Local(parts) => Ok(parts.clone()),
            MessageBody::Mime(raw) => {
                let parsed = mailparse::parse_mail(raw)?;
                let mut out = Decomposed::default();
                collect_parts(&parsed, &mut out)?;
                Ok(out)
            }
        }
    }
}

impl MessageDecomposer for MailparseDecomposer {
    fn decompose(&self, message: &WireMessage) -> Result<Decomposed> {
        let mut parts = self.split(message)?;
        match (&parts.text, &parts.html) {
            (Some(text), None) => parts.html = Some(text_to_html(text)),
            (None, Some(html)) => parts.text = Some(html_to_text(html)),
            _ => {}
        }
        Ok(parts)
    }

    fn decompose_draft(&self, message: &WireMessage) -> Result<Decomposed> {
        self.split(message)
    }
}

fn append_text(slot: &mut Option<String>, body: String) {
    match slot {
        Some(existing) => {
            existing.push_str("\r\n");
            existing.push_str(&body);
        }
        None => *slot = Some(body),
    }
}

fn collect_parts(part: &ParsedMail<'_>, out: &mut Decomposed) -> Result<()> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect_parts(sub, out)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let is_attachment = matches!(disposition.disposition, DispositionType::Attachment)
        || disposition.params.contains_key("filename")
        || !(mimetype == "text/plain" || mimetype == "text/html");

    if !is_attachment {
        let body = part.get_body()?;
        if mimetype == "text/html" {
            append_text(&mut out.html, body);
        } else {
            append_text(&mut out.text, body);
        }
        return Ok(());
    }

    let headers = part.get_headers();
    out.attachments.push(AttachmentPart {
        attachment_id: None,
        mime_type: mimetype,
        name: part.ctype.params.get("name").cloned(),
        content_disposition: headers.get_first_value("Content-Disposition"),
        content_id: headers
            .get_first_value("Content-ID")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
        size: None,
        store_data: None,
        content: AttachmentContent::Bytes(part.get_body_raw()?),
    });
    Ok(())
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag regex"));
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>").expect("Invalid break regex"));

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Minimal html rendition of plain text
pub fn text_to_html(text: &str) -> String {
    let escaped = escape_html(text);
    let lines: Vec<&str> = escaped.lines().collect();
    format!("<pre class=\"text\">{}</pre>", lines.join("<br>"))
}

/// Plain text approximation of html
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BREAK_RE.replace_all(html, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Short preview of a message body: quoted lines and signature dropped,
/// whitespace collapsed, cut to `max_chars` characters
pub fn calculate_preview(text: Option<&str>, max_chars: usize) -> Option<String> {
    let text = text?;
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed == "--" || trimmed == "-- " {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(trimmed);
    }

    let collapsed = kept
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(max_chars).collect())
}

/// Parse a Content-Disposition value into its type (no parameters) and
/// the `filename` and `size` parameters
pub fn parse_disposition(raw: &str) -> (String, Option<String>, Option<u64>) {
    let kind = raw
        .split(';')
        .next()
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let parsed = mailparse::parse_content_disposition(raw);
    let filename = parsed.params.get("filename").cloned();
    let size = parsed
        .params
        .get("size")
        .and_then(|v| v.trim().parse::<u64>().ok());
    (kind, filename, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Subject: Report\r\n\
Message-ID: <m1@example.com>\r\n\
Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"; size=3\r\n\
Content-ID: <part1@example.com>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
YWJj\r\n\
--XX--\r\n";

    #[test]
    fn test_header_accessors() {
        let msg = WireMessage::from_rfc822(Some("1".into()), MULTIPART).expect("Should parse");

        assert_eq!(msg.message_id().as_deref(), Some("<m1@example.com>"));
        assert_eq!(msg.subject().as_deref(), Some("Report"));
        assert_eq!(msg.mime_type(), "multipart/mixed");
        assert_eq!(msg.from(), vec![Address::with_name("alice@example.com", "Alice")]);
        assert_eq!(msg.to().len(), 2);
        assert!(msg.sent_date().is_some());
    }

    #[test]
    fn test_decompose_multipart() {
        let msg = WireMessage::from_rfc822(None, MULTIPART).expect("Should parse");
        let parts = MailparseDecomposer.decompose(&msg).expect("Should decompose");

        assert_eq!(parts.text.as_deref().map(str::trim), Some("See attached."));
        assert!(parts.html.is_some());
        assert_eq!(parts.attachments.len(), 1);

        let att = &parts.attachments[0];
        assert_eq!(att.mime_type, "application/pdf");
        assert_eq!(att.name.as_deref(), Some("report.pdf"));
        assert_eq!(att.content_id.as_deref(), Some("part1@example.com"));
        assert_eq!(att.content, AttachmentContent::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn test_draft_keeps_parts_untouched() {
        let msg = WireMessage::from_rfc822(None, MULTIPART).expect("Should parse");
        let parts = MailparseDecomposer
            .decompose_draft(&msg)
            .expect("Should decompose");
        assert!(parts.html.is_none());
    }

    #[test]
    fn test_preview() {
        let text = "Hi Bob,\n> quoted line\n\n  thanks   again\n-- \nAlice";
        assert_eq!(
            calculate_preview(Some(text), 512).as_deref(),
            Some("Hi Bob, thanks again")
        );
        assert_eq!(calculate_preview(Some(text), 6).as_deref(), Some("Hi Bob"));
        assert_eq!(calculate_preview(Some("> only quotes"), 10), None);
    }

    #[test]
    fn test_parse_disposition() {
        let (kind, filename, size) =
            parse_disposition("Attachment; filename=\"a.txt\"; size=1234");
        assert_eq!(kind, "attachment");
        assert_eq!(filename.as_deref(), Some("a.txt"));
        assert_eq!(size, Some(1234));
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("<p>a &amp; b</p><br/>c"), "a & b\n\nc");
    }
}
