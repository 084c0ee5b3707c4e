//! Extractors for Google-hosted documents (Docs, Sheets, Slides).
//!
//! These formats have no binary body; content comes from the corresponding
//! JSON API and is traversed as raw `serde_json::Value` trees, reading only
//! the known keys.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::provider::FileDescriptor;

use super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};

const GDOC_MIME: &str = "application/vnd.google-apps.document";
const GSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const GSLIDES_MIME: &str = "application/vnd.google-apps.presentation";

/// Extracts text from Google Docs documents.
pub struct GoogleDocsExtractor;

#[async_trait]
impl Extractor for GoogleDocsExtractor {
    fn name(&self) -> &'static str {
        "gdoc"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[GDOC_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &[]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(GDOC_MIME)
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        let doc = ctx.get_document(&file.id).await?;
        let content = doc
            .pointer("/body/content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = String::new();
        for element in &content {
            let Some(paragraph) = element.get("paragraph") else {
                continue;
            };
            for part in paragraph
                .get("elements")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(text) = part.pointer("/textRun/content").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }

        // Docs uses vertical tabs for manual line breaks.
        let text = out.replace('\u{000b}', "\n").trim().to_string();
        Ok(ExtractedContent::new(text, "gdoc"))
    }
}

/// Extracts text from Google Sheets spreadsheets.
pub struct GoogleSheetsExtractor;

#[async_trait]
impl Extractor for GoogleSheetsExtractor {
    fn name(&self) -> &'static str {
        "gsheet"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[GSHEET_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &[]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(GSHEET_MIME)
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        let spreadsheet = ctx.get_spreadsheet(&file.id).await?;
        let sheets = spreadsheet
            .get("sheets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let row_limit = ctx.settings.max_rows_per_sheet;

        let mut lines: Vec<String> = Vec::new();
        for sheet in &sheets {
            let title = sheet
                .pointer("/properties/title")
                .and_then(Value::as_str)
                .unwrap_or("Sheet");
            let range = format!("'{title}'!A1:ZZ{row_limit}");
            let response = ctx.get_sheet_values(&file.id, &range).await?;
            let values = response
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if values.is_empty() {
                continue;
            }

            lines.push(format!("=== SHEET: {title} ==="));
            for row in &values {
                let cells: Vec<String> = row
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(cell_to_string)
                    .filter(|cell| !cell.is_empty())
                    .collect();
                if !cells.is_empty() {
                    lines.push(cells.join("\t"));
                }
            }
        }

        Ok(ExtractedContent::new(lines.join("\n").trim().to_string(), "gsheet"))
    }
}

/// Extracts text from Google Slides presentations.
pub struct GoogleSlidesExtractor;

#[async_trait]
impl Extractor for GoogleSlidesExtractor {
    fn name(&self) -> &'static str {
        "gslides"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[GSLIDES_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &[]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(GSLIDES_MIME)
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        let presentation = ctx.get_presentation(&file.id).await?;
        let slides = presentation
            .get("slides")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut lines: Vec<String> = Vec::new();
        for (index, slide) in slides.iter().enumerate() {
            lines.push(format!("=== SLIDE {} ===", index + 1));
            for element in slide
                .get("pageElements")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                collect_element_lines(element, &mut lines);
            }
            lines.push(String::new());
        }

        let mut metadata = Map::new();
        metadata.insert("slide_count".to_string(), Value::from(slides.len()));

        Ok(ExtractedContent {
            text: lines.join("\n").trim().to_string(),
            file_type: "gslides".to_string(),
            metadata,
        })
    }
}

/// Collects text lines from one page element: shape text, table cells
/// (`cell | cell`), and nested groups.
fn collect_element_lines(element: &Value, lines: &mut Vec<String>) {
    let shape_text = element
        .pointer("/shape/text/textElements")
        .and_then(Value::as_array)
        .map(|els| text_elements_to_string(els))
        .unwrap_or_default();
    if !shape_text.is_empty() {
        lines.push(shape_text);
    }

    for row in element
        .pointer("/table/tableRows")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let cells: Vec<String> = row
            .get("tableCells")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|cell| {
                cell.pointer("/text/textElements")
                    .and_then(Value::as_array)
                    .map(|els| text_elements_to_string(els))
            })
            .filter(|cell| !cell.is_empty())
            .collect();
        if !cells.is_empty() {
            lines.push(cells.join(" | "));
        }
    }

    for child in element
        .pointer("/group/children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        collect_element_lines(child, lines);
    }
}

fn text_elements_to_string(elements: &[Value]) -> String {
    let parts: Vec<&str> = elements
        .iter()
        .filter_map(|el| el.pointer("/textRun/content").and_then(Value::as_str))
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .collect();
    parts.join(" ").trim().to_string()
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
