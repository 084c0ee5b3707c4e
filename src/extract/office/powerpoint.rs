//! Presentation extraction: PPTX in-process, legacy PPT via `catppt`.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Map, Value};

use crate::provider::FileDescriptor;

use super::super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};
use super::{open_zip, read_zip_entry, run_decoder};

const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const PPT_MIME: &str = "application/vnd.ms-powerpoint";

/// Extracts text from PPTX presentations.
pub struct PptxExtractor;

#[async_trait]
impl Extractor for PptxExtractor {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[PPTX_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["pptx"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(PPTX_MIME)
            || file.effective_extension().as_deref() == Some("pptx")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("pptx", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let mut metadata = Map::new();
        metadata.insert(
            "mime_type".to_string(),
            file.mime_type.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert("file_size_bytes".to_string(), Value::from(bytes.len()));

        let text = tokio::task::spawn_blocking(move || extract_pptx(&bytes)).await??;

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "pptx".to_string(),
            metadata,
        })
    }
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let archive = open_zip(bytes, "pptx")?;

    // Slides are ppt/slides/slideN.xml; order by N, not by archive order.
    let mut slide_entries: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    drop(archive);
    slide_entries.sort_unstable();

    let mut lines: Vec<String> = Vec::new();
    for (index, (_, entry)) in slide_entries.iter().enumerate() {
        let xml = read_zip_entry(bytes, entry, "pptx")?;
        lines.push(format!("=== SLIDE {} ===", index + 1));
        parse_slide(&xml, &mut lines)?;
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

/// Walks one slide: `a:p` paragraphs become lines, `a:tbl` rows become
/// `cell | cell` lines. Grouped shapes flatten naturally since their text
/// bodies nest in the same document order.
fn parse_slide(xml: &str, lines: &mut Vec<String>) -> Result<(), ExtractError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut cells: Vec<String> = Vec::new();
    let mut table_depth: u32 = 0;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"a:tbl" => table_depth += 1,
                b"a:tc" => cell.clear(),
                b"a:p" if table_depth == 0 => paragraph.clear(),
                b"a:t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"a:tbl" => table_depth = table_depth.saturating_sub(1),
                b"a:tc" => {
                    let text = cell.trim();
                    if !text.is_empty() {
                        cells.push(text.to_string());
                    }
                }
                b"a:tr" => {
                    if !cells.is_empty() {
                        lines.push(cells.join(" | "));
                        cells.clear();
                    }
                }
                b"a:p" => {
                    if table_depth == 0 {
                        let text = paragraph.trim();
                        if !text.is_empty() {
                            lines.push(text.to_string());
                        }
                    } else {
                        cell.push(' ');
                    }
                }
                b"a:t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|err| ExtractError::Decode {
                    format: "pptx",
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
                    format: "pptx",
                    message: err.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Extracts text from legacy PPT presentations via `catppt`.
pub struct PptExtractor;

#[async_trait]
impl Extractor for PptExtractor {
    fn name(&self) -> &'static str {
        "ppt"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[PPT_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["ppt"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(PPT_MIME)
            || file.effective_extension().as_deref() == Some("ppt")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("ppt", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let mut metadata = Map::new();
        metadata.insert(
            "mime_type".to_string(),
            file.mime_type.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert("file_size_bytes".to_string(), Value::from(bytes.len()));

        let text = run_decoder("catppt", "ppt", ".ppt", bytes).await?;

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "ppt".to_string(),
            metadata,
        })
    }
}
