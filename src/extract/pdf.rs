//! PDF text extraction with an OCR fallback for scanned documents.
//!
//! Text layers are read with `lopdf`. When a document has no text layer,
//! pages are rasterized with `pdftoppm` and read back with `tesseract`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::extract::PdfText;

/// Default OCR language pack (Italian documents, English fallback).
pub const DEFAULT_OCR_LANG: &str = "ita+eng";

/// Default bound on OCR of a single document.
pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(120);

/// Reads text out of an image-only PDF.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn ocr_pdf(&self, data: &[u8]) -> Result<String, ExtractionError>;
}

/// OCR through the poppler `pdftoppm` and `tesseract` command-line tools.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    lang: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(lang: impl Into<String>, timeout: Duration) -> Self {
        Self {
            lang: lang.into(),
            timeout,
        }
    }

    /// `Some` only when both binaries can be launched.
    pub async fn detect(lang: impl Into<String>, timeout: Duration) -> Option<Self> {
        let pdftoppm = Command::new("pdftoppm").arg("-v").output().await.is_ok();
        let tesseract = Command::new("tesseract").arg("--version").output().await.is_ok();
        if pdftoppm && tesseract {
            Some(Self::new(lang, timeout))
        } else {
            debug!(pdftoppm, tesseract, "OCR tools not found");
            None
        }
    }

    async fn run(&self, data: &[u8]) -> Result<String, ExtractionError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, data).await?;

        let prefix = dir.path().join("page");
        let status = Command::new("pdftoppm")
            .args(["-r", "300", "-png"])
            .arg(&input)
            .arg(&prefix)
            .kill_on_drop(true)
            .status()
            .await?;
        if !status.success() {
            return Err(ExtractionError::Ocr(format!("pdftoppm exited with {status}")));
        }

        let mut text = String::new();
        for image in rendered_pages(dir.path()).await? {
            let output = Command::new("tesseract")
                .arg(&image)
                .arg("stdout")
                .args(["-l", &self.lang])
                .kill_on_drop(true)
                .output()
                .await?;
            if !output.status.success() {
                return Err(ExtractionError::Ocr(format!(
                    "tesseract exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            text.push_str(&String::from_utf8_lossy(&output.stdout));
            text.push('\n');
        }
        Ok(text)
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn ocr_pdf(&self, data: &[u8]) -> Result<String, ExtractionError> {
        tokio::time::timeout(self.timeout, self.run(data))
            .await
            .map_err(|_| ExtractionError::OcrTimeout(self.timeout))?
    }
}

/// PNG pages written by pdftoppm, in page order.
async fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            pages.push(path);
        }
    }
    // pdftoppm zero-pads page numbers, so lexical order is page order.
    pages.sort();
    Ok(pages)
}

/// Text layer of every page, joined by newlines. Pages that fail to decode
/// are skipped.
pub fn extract_pdf_text(data: &[u8]) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load_mem(data).map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    let mut pages_text = Vec::new();
    for page_num in doc.get_pages().keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => pages_text.push(text),
            Err(e) => warn!(page = page_num, error = %e, "Skipping unreadable PDF page"),
        }
    }
    Ok(pages_text.join("\n"))
}

/// Read one PDF into a `PdfText`, falling back to OCR for blank text layers.
pub async fn read_pdf(data: &[u8], ocr: Option<&dyn OcrBackend>) -> PdfText {
    let owned = data.to_vec();
    let text_layer = tokio::task::spawn_blocking(move || extract_pdf_text(&owned))
        .await
        .unwrap_or_else(|e| Err(ExtractionError::Pdf(format!("PDF parser crashed: {e}"))));
    resolve_text_layer(text_layer, data, ocr).await
}

async fn resolve_text_layer(
    text_layer: Result<String, ExtractionError>,
    data: &[u8],
    ocr: Option<&dyn OcrBackend>,
) -> PdfText {
    match text_layer {
        Ok(text) if !text.trim().is_empty() => PdfText::Text(text.trim().to_string()),
        Ok(_) => match ocr {
            Some(backend) => match backend.ocr_pdf(data).await {
                Ok(text) if !text.trim().is_empty() => PdfText::Text(text.trim().to_string()),
                Ok(_) => PdfText::NoExtractableText,
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "OCR failed");
                    PdfText::Unreadable {
                        reason: e.to_string(),
                    }
                }
            },
            None => PdfText::NoExtractableText,
        },
        Err(e) => {
            warn!(error = %e, "PDF text extraction failed");
            PdfText::Unreadable {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOcr(Result<&'static str, ()>);

    #[async_trait]
    impl OcrBackend for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn ocr_pdf(&self, _data: &[u8]) -> Result<String, ExtractionError> {
            self.0
                .map(str::to_string)
                .map_err(|_| ExtractionError::Ocr("engine crashed".into()))
        }
    }

    #[test]
    fn garbage_is_not_a_pdf() {
        assert!(matches!(
            extract_pdf_text(b"definitely not a pdf"),
            Err(ExtractionError::Pdf(_))
        ));
    }

    #[tokio::test]
    async fn read_pdf_reports_unreadable_for_garbage() {
        let text = read_pdf(b"garbage", None).await;
        assert!(matches!(text, PdfText::Unreadable { .. }));
        assert!(text.render().starts_with("Error reading PDF: "));
    }

    #[tokio::test]
    async fn text_layer_wins_over_ocr() {
        let ocr: &dyn OcrBackend = &FixedOcr(Ok("ocr text"));
        let text = resolve_text_layer(Ok("  layer text \n".into()), b"", Some(ocr)).await;
        assert_eq!(text, PdfText::Text("layer text".into()));
    }

    #[tokio::test]
    async fn blank_layer_without_ocr_is_marked() {
        let text = resolve_text_layer(Ok(" \n ".into()), b"", None).await;
        assert_eq!(text, PdfText::NoExtractableText);
        assert_eq!(text.render(), "[PDF without text - OCR not available]");
    }

    #[tokio::test]
    async fn blank_layer_falls_back_to_ocr() {
        let ocr: &dyn OcrBackend = &FixedOcr(Ok("Via Roma 1, Milano\n"));
        let text = resolve_text_layer(Ok(String::new()), b"", Some(ocr)).await;
        assert_eq!(text, PdfText::Text("Via Roma 1, Milano".into()));
    }

    #[tokio::test]
    async fn ocr_failure_is_unreadable() {
        let ocr: &dyn OcrBackend = &FixedOcr(Err(()));
        let text = resolve_text_layer(Ok(String::new()), b"", Some(ocr)).await;
        assert_eq!(
            text,
            PdfText::Unreadable {
                reason: "OCR failed: engine crashed".into()
            }
        );
    }

    #[tokio::test]
    async fn ocr_finding_nothing_is_no_text() {
        let ocr: &dyn OcrBackend = &FixedOcr(Ok("   "));
        let text = resolve_text_layer(Ok(String::new()), b"", Some(ocr)).await;
        assert_eq!(text, PdfText::NoExtractableText);
    }
}
