//! Email-specific types — the fetched `RawMessage`, its dedup fingerprint,
//! and MIME part helpers shared by the extractor and the forwarder.

use std::fmt;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};

/// A fetched mail object: mailbox sequence number plus the full RFC822 bytes.
///
/// Owned by the poll loop for one iteration and never persisted.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// IMAP sequence number (or any source-local id).
    pub seq: u32,
    bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(seq: u32, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse the MIME tree. `None` when the bytes are not a mail message.
    pub fn parse(&self) -> Option<mail_parser::Message<'_>> {
        MessageParser::default().parse(self.bytes.as_slice())
    }

    /// Derive the `(From, Subject, Date)` dedup key.
    ///
    /// Messages that cannot be parsed get a key from their sequence number
    /// and size, so they are still deduplicated within one run.
    pub fn fingerprint(&self) -> MessageFingerprint {
        match self.parse() {
            Some(parsed) => MessageFingerprint::from_parts(
                &sender_display(&parsed),
                parsed.subject().unwrap_or_default(),
                &parsed.date().map(|d| d.to_rfc822()).unwrap_or_default(),
            ),
            None => MessageFingerprint(format!("unparsed-{}-{}", self.seq, self.bytes.len())),
        }
    }
}

/// Intra-process dedup key. Not stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageFingerprint(String);

impl MessageFingerprint {
    pub fn from_parts(from: &str, subject: &str, date: &str) -> Self {
        Self(format!("{from}-{subject}-{date}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `Name <address>` (or just the address) of the first From entry.
pub fn sender_display(parsed: &mail_parser::Message<'_>) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default()
}

/// Lowercased `type/subtype` of a part, inferred from the body kind when
/// the part carries no Content-Type header.
pub fn mime_type(part: &MessagePart<'_>) -> String {
    if let Some(ct) = part.content_type() {
        let subtype = ct.subtype().unwrap_or_default();
        return format!("{}/{}", ct.ctype(), subtype).to_ascii_lowercase();
    }
    match &part.body {
        PartType::Text(_) => "text/plain".to_string(),
        PartType::Html(_) => "text/html".to_string(),
        PartType::Message(_) => "message/rfc822".to_string(),
        PartType::Multipart(_) => "multipart/mixed".to_string(),
        PartType::Binary(_) | PartType::InlineBinary(_) => "application/octet-stream".to_string(),
    }
}

/// Lowercased Content-Disposition type (`attachment`, `inline`), if any.
pub fn disposition(part: &MessagePart<'_>) -> Option<String> {
    part.content_disposition()
        .map(|cd| cd.ctype().to_ascii_lowercase())
}

pub fn is_attachment(part: &MessagePart<'_>) -> bool {
    disposition(part).as_deref() == Some("attachment")
}

/// A PDF found in the original message.
#[derive(Debug, Clone, Copy)]
pub struct PdfPart<'a> {
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

/// PDF detection rule: disposition `attachment` or `inline`, and either
/// `application/pdf` or `application/octet-stream` with a `.pdf` filename.
pub fn is_pdf_part(part: &MessagePart<'_>) -> bool {
    if matches!(part.body, PartType::Multipart(_) | PartType::Message(_)) {
        return false;
    }
    if !matches!(disposition(part).as_deref(), Some("attachment" | "inline")) {
        return false;
    }
    match mime_type(part).as_str() {
        "application/pdf" => true,
        "application/octet-stream" => part
            .attachment_name()
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(".pdf")),
        _ => false,
    }
}

/// Every PDF part of the message, in MIME order. Empty payloads are skipped.
pub fn pdf_parts<'a>(parsed: &'a mail_parser::Message<'a>) -> Vec<PdfPart<'a>> {
    parsed
        .parts
        .iter()
        .filter(|part| is_pdf_part(part))
        .map(|part| PdfPart {
            filename: part.attachment_name(),
            data: part.contents(),
        })
        .filter(|pdf| !pdf.data.is_empty())
        .collect()
}
