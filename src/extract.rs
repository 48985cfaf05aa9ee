//! Document text extraction and OCR.
//!
//! [`LocalExtractor`] is the default [`TextExtractor`]: PDF text layers via
//! `pdf-extract`, DOCX/PPTX via their XML parts, UTF-8 text as-is, and
//! images through an external OCR engine (`tesseract`). Parsing runs on the
//! blocking pool; OCR runs as a child process.
//!
//! Content types are derived from file extensions with
//! [`content_type_for_path`]; audio types are routed to transcription by
//! the service, not here.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::traits::TextExtractor;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_TIFF: &str = "image/tiff";
pub const MIME_OCTET: &str = "application/octet-stream";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Best-effort MIME type from a file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "txt" | "text" | "vtt" | "srt" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "png" => MIME_PNG,
        "jpg" | "jpeg" => MIME_JPEG,
        "tif" | "tiff" => MIME_TIFF,
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => MIME_OCTET,
    }
}

pub fn is_audio(content_type: &str) -> bool {
    content_type.starts_with("audio/")
}

pub fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Extracts text from documents that carry a text layer. Images are not
/// handled here; see [`LocalExtractor`].
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map_err(|e| ExtractError::Encoding(e.to_string())),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_text_runs(&xml, b"p", "\n")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_text_runs(&xml, b"p", " ")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate the text of every `<*:t>` element, inserting `separator`
/// at the end of each `<*:{block}>` element that produced text.
fn collect_text_runs(xml: &[u8], block: &[u8], separator: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut block_has_text = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::End(e)) if e.local_name().as_ref() == block => {
                if block_has_text {
                    out.push_str(separator);
                    block_has_text = false;
                }
            }
            Ok(Event::Text(te)) if in_t => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
                block_has_text = true;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Default [`TextExtractor`]: in-process parsing plus an external OCR
/// command for images.
pub struct LocalExtractor {
    ocr: Option<OcrConfig>,
}

impl LocalExtractor {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            ocr: config.is_enabled().then(|| config.clone()),
        }
    }

    async fn ocr_image(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let Some(ocr) = &self.ocr else {
            bail!("OCR is disabled; set ocr.engine = \"tesseract\" to read {content_type} files");
        };

        let suffix = match content_type {
            MIME_PNG => ".png",
            MIME_JPEG => ".jpg",
            MIME_TIFF => ".tiff",
            _ => ".img",
        };
        let mut input = tempfile::Builder::new()
            .prefix("meetease-ocr-")
            .suffix(suffix)
            .tempfile()
            .context("failed to create OCR input file")?;
        input
            .write_all(bytes)
            .context("failed to write OCR input file")?;

        let output = Command::new(&ocr.command)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&ocr.language)
            .output()
            .await
            .with_context(|| {
                format!(
                    "failed to run OCR command '{}'; is it installed and on PATH?",
                    ocr.command
                )
            })?;

        if !output.status.success() {
            bail!(
                "OCR command '{}' exited with {}: {}",
                ocr.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("OCR output is not valid UTF-8")
    }
}

#[async_trait]
impl TextExtractor for LocalExtractor {
    fn engine(&self) -> String {
        match &self.ocr {
            Some(ocr) => format!("local+{}:{}", ocr.engine, ocr.language),
            None => "local".to_string(),
        }
    }

    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        if is_image(content_type) {
            return self.ocr_image(bytes, content_type).await;
        }
        let owned = bytes.to_vec();
        let ct = content_type.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&owned, &ct))
            .await
            .context("extraction task panicked")??;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", MIME_OCTET).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_paragraphs(&["Agenda", "1. Budget &amp; hiring"]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "Agenda\n1. Budget & hiring");
    }

    #[test]
    fn plain_text_must_be_utf8() {
        assert_eq!(extract_text("héllo".as_bytes(), MIME_TEXT).unwrap(), "héllo");
        assert!(matches!(
            extract_text(&[0xff, 0xfe], MIME_TEXT).unwrap_err(),
            ExtractError::Encoding(_)
        ));
    }

    #[test]
    fn content_types_from_extensions() {
        assert_eq!(content_type_for_path(Path::new("a/B.PDF")), MIME_PDF);
        assert_eq!(content_type_for_path(Path::new("notes.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for_path(Path::new("scan.jpeg")), MIME_JPEG);
        assert!(is_audio(content_type_for_path(Path::new("call.m4a"))));
        assert_eq!(content_type_for_path(Path::new("noext")), MIME_OCTET);
    }

    #[tokio::test]
    async fn images_fail_cleanly_when_ocr_disabled() {
        let config = OcrConfig {
            engine: "disabled".to_string(),
            ..OcrConfig::default()
        };
        let extractor = LocalExtractor::new(&config);
        assert_eq!(extractor.engine(), "local");
        let err = extractor.extract(b"\x89PNG", MIME_PNG).await.unwrap_err();
        assert!(err.to_string().contains("OCR is disabled"));
    }

    #[tokio::test]
    async fn missing_ocr_binary_is_reported() {
        let config = OcrConfig {
            command: "definitely-not-a-real-ocr-binary".to_string(),
            ..OcrConfig::default()
        };
        let extractor = LocalExtractor::new(&config);
        let err = extractor.extract(b"\x89PNG", MIME_PNG).await.unwrap_err();
        assert!(format!("{err:#}").contains("definitely-not-a-real-ocr-binary"));
    }

    #[tokio::test]
    async fn text_documents_go_through_the_blocking_pool() {
        let extractor = LocalExtractor::new(&OcrConfig::default());
        let text = extractor.extract(b"hello", MIME_TEXT).await.unwrap();
        assert_eq!(text, "hello");
    }
}
