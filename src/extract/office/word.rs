//! Word document extraction: DOCX in-process, legacy DOC via `catdoc`.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Map, Value};

use crate::provider::FileDescriptor;

use super::super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};
use super::{read_zip_entry, run_decoder};

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const DOC_MIME: &str = "application/msword";

fn office_metadata(file: &FileDescriptor, size: usize) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "mime_type".to_string(),
        file.mime_type.clone().map_or(Value::Null, Value::from),
    );
    metadata.insert("file_size_bytes".to_string(), Value::from(size));
    metadata
}

/// Extracts text from DOCX files.
pub struct DocxExtractor;

#[async_trait]
impl Extractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[DOCX_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["docx"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(DOCX_MIME)
            || file.effective_extension().as_deref() == Some("docx")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("docx", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let metadata = office_metadata(file, bytes.len());
        let text = tokio::task::spawn_blocking(move || extract_docx(&bytes)).await??;

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "docx".to_string(),
            metadata,
        })
    }
}

/// Walks `word/document.xml`: paragraphs become lines, table rows become
/// `cell | cell` lines.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let xml = read_zip_entry(bytes, "word/document.xml", "docx")?;

    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut lines: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut cells: Vec<String> = Vec::new();
    let mut table_depth: u32 = 0;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:tc" => cell.clear(),
                b"w:p" if table_depth == 0 => paragraph.clear(),
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                b"w:tc" => {
                    let text = cell.trim();
                    if !text.is_empty() {
                        cells.push(text.to_string());
                    }
                }
                b"w:tr" => {
                    if !cells.is_empty() {
                        lines.push(cells.join(" | "));
                        cells.clear();
                    }
                }
                b"w:p" => {
                    if table_depth == 0 {
                        let text = paragraph.trim();
                        if !text.is_empty() {
                            lines.push(text.to_string());
                        }
                    } else {
                        // Paragraph break inside a table cell.
                        cell.push(' ');
                    }
                }
                b"w:t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|err| ExtractError::Decode {
                    format: "docx",
                    message: err.to_string(),
                })?;
                if table_depth > 0 {
                    cell.push_str(&text);
                } else {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(ExtractError::Decode {
                    format: "docx",
                    message: err.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(lines.join("\n"))
}

/// Extracts text from legacy DOC files via `catdoc`.
pub struct DocExtractor;

#[async_trait]
impl Extractor for DocExtractor {
    fn name(&self) -> &'static str {
        "doc"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[DOC_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["doc"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(DOC_MIME)
            || file.effective_extension().as_deref() == Some("doc")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("doc", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let metadata = office_metadata(file, bytes.len());
        let text = run_decoder("catdoc", "doc", ".doc", bytes).await?;

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "doc".to_string(),
            metadata,
        })
    }
}
