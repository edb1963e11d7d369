//! Content extraction — raw mail to normalized text.
//!
//! Produces the subject, the readable body (plain text preferred, HTML
//! converted otherwise) and the text of any PDF attachments. Extraction
//! never fails outward: undecodable parts are logged and skipped.

pub mod html;
pub mod pdf;

use std::borrow::Cow;
use std::sync::Arc;

use mail_parser::PartType;
use tracing::{debug, warn};

use crate::channels::RawMessage;
use crate::channels::email_types::{is_attachment, mime_type, pdf_parts};

pub use html::html_to_text;
pub use pdf::{OcrBackend, TesseractOcr, extract_pdf_text, read_pdf};

/// Rendering of `PdfText::Absent`.
pub const NO_PDF_SENTINEL: &str = "No PDF attachment found.";

/// Rendering of `PdfText::NoExtractableText`.
pub const NO_OCR_MARKER: &str = "[PDF without text - OCR not available]";

/// Outcome of reading the PDF attachments of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfText {
    /// The message carries no PDF.
    Absent,
    Text(String),
    /// Image-only PDF and OCR could not be used.
    NoExtractableText,
    Unreadable { reason: String },
}

impl PdfText {
    /// Text handed to the classifier and written in forwards.
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Absent => Cow::Borrowed(NO_PDF_SENTINEL),
            Self::Text(text) => Cow::Borrowed(text),
            Self::NoExtractableText => Cow::Borrowed(NO_OCR_MARKER),
            Self::Unreadable { reason } => Cow::Owned(format!("Error reading PDF: {reason}")),
        }
    }
}

/// Normalized content of one message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub subject: String,
    pub body: String,
    pub pdf: PdfText,
}

impl ExtractedContent {
    pub fn pdf_text(&self) -> Cow<'_, str> {
        self.pdf.render()
    }

    /// Subject, body and PDF text as separate sections, in that order.
    pub fn combined(&self) -> String {
        format!(
            "Subject: {}\n\n{}\n\nPDF Attachment:\n{}",
            self.subject,
            self.body,
            self.pdf.render()
        )
    }
}

/// Turns `RawMessage`s into `ExtractedContent`.
#[derive(Clone, Default)]
pub struct ContentExtractor {
    ocr: Option<Arc<dyn OcrBackend>>,
}

impl ContentExtractor {
    pub fn new(ocr: Option<Arc<dyn OcrBackend>>) -> Self {
        Self { ocr }
    }

    pub async fn extract(&self, raw: &RawMessage) -> ExtractedContent {
        // Copy everything out of the borrowed MIME tree before awaiting.
        let (subject, body, pdfs) = match raw.parse() {
            Some(parsed) => {
                let pdfs: Vec<(Option<String>, Vec<u8>)> = pdf_parts(&parsed)
                    .into_iter()
                    .map(|p| (p.filename.map(str::to_string), p.data.to_vec()))
                    .collect();
                (
                    parsed.subject().unwrap_or_default().to_string(),
                    body_text(&parsed),
                    pdfs,
                )
            }
            None => {
                warn!(seq = raw.seq, "Message could not be parsed, using raw bytes as body");
                (
                    String::new(),
                    String::from_utf8_lossy(raw.as_bytes()).into_owned(),
                    Vec::new(),
                )
            }
        };

        let pdf = self.read_pdfs(&pdfs).await;
        debug!(
            seq = raw.seq,
            body_len = body.len(),
            pdf_count = pdfs.len(),
            "Extracted message content"
        );

        ExtractedContent { subject, body, pdf }
    }

    async fn read_pdfs(&self, pdfs: &[(Option<String>, Vec<u8>)]) -> PdfText {
        let ocr = self.ocr.as_deref();
        match pdfs {
            [] => PdfText::Absent,
            [(_, data)] => read_pdf(data, ocr).await,
            many => {
                let mut sections = Vec::with_capacity(many.len());
                for (idx, (name, data)) in many.iter().enumerate() {
                    let text = read_pdf(data, ocr).await;
                    let label = name
                        .clone()
                        .unwrap_or_else(|| format!("attachment_{idx}.pdf"));
                    sections.push(format!("--- {label} ---\n{}", text.render()));
                }
                PdfText::Text(sections.join("\n\n"))
            }
        }
    }
}

/// First inline `text/plain` part, else the first inline HTML part
/// converted to text. Empty when neither exists.
fn body_text(parsed: &mail_parser::Message<'_>) -> String {
    let mut html: Option<&str> = None;
    for part in &parsed.parts {
        if is_attachment(part) {
            continue;
        }
        match &part.body {
            PartType::Text(text) if mime_type(part) == "text/plain" => {
                return text.trim().to_string();
            }
            PartType::Html(markup) if html.is_none() => html = Some(markup.as_ref()),
            _ => {}
        }
    }
    html.map(html_to_text).unwrap_or_default()
}
