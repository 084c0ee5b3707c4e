//! PDF text extraction with two pluggable engines.
//!
//! `pdf-extract` is the layout-aware default; `lopdf` extracts raw per-page
//! text and is the fallback for documents the default engine mangles. Both
//! honor the configured page cap, appending a truncation marker when pages
//! were dropped. Decoding is CPU-bound and runs on the blocking pool.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::PdfEngine;
use crate::provider::FileDescriptor;

use super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};

const MIME_TYPES: [&str; 2] = ["application/pdf", "application/x-pdf"];

/// Extracts text from PDF documents.
pub struct PdfExtractor;

#[async_trait]
impl Extractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn mime_types(&self) -> &[&'static str] {
        &MIME_TYPES
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        let mime = file.mime_type.as_deref().unwrap_or("");
        MIME_TYPES.contains(&mime) || file.effective_extension().as_deref() == Some("pdf")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        let max_bytes = ctx.settings.pdf_max_bytes();
        if let Some(size) = file.size_bytes {
            if size > max_bytes {
                return Ok(ExtractedContent::size_limited("pdf", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let byte_len = bytes.len();
        let max_pages = ctx.settings.pdf_max_pages;
        let engine = ctx.settings.pdf_engine;

        let text =
            tokio::task::spawn_blocking(move || decode(&bytes, max_pages, engine)).await??;

        let mut metadata = Map::new();
        metadata.insert("file_size_bytes".to_string(), Value::from(byte_len));
        metadata.insert("engine".to_string(), Value::from(engine.as_str()));

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "pdf".to_string(),
            metadata,
        })
    }
}

fn decode(bytes: &[u8], max_pages: u32, engine: PdfEngine) -> Result<String, ExtractError> {
    match engine {
        PdfEngine::PdfExtract => decode_pdf_extract(bytes, max_pages),
        PdfEngine::Lopdf => decode_lopdf(bytes, max_pages),
    }
}

fn decode_pdf_extract(bytes: &[u8], max_pages: u32) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|err| {
        ExtractError::Decode {
            format: "pdf",
            message: err.to_string(),
        }
    })?;
    Ok(join_pages(
        pages.iter().map(String::as_str),
        pages.len(),
        max_pages,
    ))
}

fn decode_lopdf(bytes: &[u8], max_pages: u32) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|err| ExtractError::Decode {
        format: "pdf",
        message: err.to_string(),
    })?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let total = page_numbers.len();

    let mut pages = Vec::new();
    for number in page_numbers {
        if max_pages > 0 && pages.len() as u32 >= max_pages {
            break;
        }
        // Pages that fail to decode individually are skipped, not fatal.
        if let Ok(text) = doc.extract_text(&[number]) {
            pages.push(text);
        } else {
            pages.push(String::new());
        }
    }

    Ok(join_pages(pages.iter().map(String::as_str), total, max_pages))
}

/// Joins non-empty page texts with blank lines, capping at `max_pages` with a
/// truncation marker (0 disables the cap).
fn join_pages<'a>(
    pages: impl Iterator<Item = &'a str>,
    total_pages: usize,
    max_pages: u32,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (index, page) in pages.enumerate() {
        if max_pages > 0 && index as u32 >= max_pages {
            break;
        }
        let trimmed = page.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }

    if max_pages > 0 && total_pages as u32 > max_pages {
        parts.push(format!("... (limited to {max_pages} pages)"));
    }

    parts.join("\n\n")
}
