//! Spreadsheet extraction: XLSX in-process, legacy XLS via `xls2csv`.
//!
//! XLSX rendering mirrors the hosted-sheets format: a `=== SHEET: <name> ===`
//! header per worksheet, tab-joined non-empty cells per row, and truncation
//! markers when the sheet or row caps cut the output.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::provider::FileDescriptor;

use super::super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};
use super::{open_zip, read_zip_entry, run_decoder};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_MIME: &str = "application/vnd.ms-excel";

fn decode_error(message: impl ToString) -> ExtractError {
    ExtractError::Decode {
        format: "xlsx",
        message: message.to_string(),
    }
}

/// Extracts text from XLSX workbooks.
pub struct XlsxExtractor;

#[async_trait]
impl Extractor for XlsxExtractor {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[XLSX_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["xlsx"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(XLSX_MIME)
            || file.effective_extension().as_deref() == Some("xlsx")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("xlsx", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let mut metadata = Map::new();
        metadata.insert(
            "mime_type".to_string(),
            file.mime_type.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert("file_size_bytes".to_string(), Value::from(bytes.len()));

        let max_sheets = ctx.settings.excel_max_sheets;
        let max_rows = ctx.settings.max_rows_per_sheet;
        let text =
            tokio::task::spawn_blocking(move || extract_xlsx(&bytes, max_sheets, max_rows))
                .await??;

        Ok(ExtractedContent {
            text: text.trim().to_string(),
            file_type: "xlsx".to_string(),
            metadata,
        })
    }
}

fn extract_xlsx(bytes: &[u8], max_sheets: u32, max_rows: u32) -> Result<String, ExtractError> {
    let sheets = parse_workbook_sheets(&read_zip_entry(bytes, "xl/workbook.xml", "xlsx")?)?;
    let rels = parse_rels(&read_zip_entry(bytes, "xl/_rels/workbook.xml.rels", "xlsx")?)?;
    let shared = read_optional_entry(bytes, "xl/sharedStrings.xml")?
        .map(|xml| parse_shared_strings(&xml))
        .transpose()?
        .unwrap_or_default();

    let mut lines: Vec<String> = Vec::new();
    for (index, (name, rid)) in sheets.iter().enumerate() {
        if max_sheets > 0 && index as u32 >= max_sheets {
            lines.push(format!("... (limited to {max_sheets} sheets)"));
            break;
        }

        let Some(target) = rels.get(rid) else {
            continue;
        };
        let path = if let Some(stripped) = target.strip_prefix('/') {
            stripped.to_string()
        } else {
            format!("xl/{target}")
        };

        let sheet_xml = read_zip_entry(bytes, &path, "xlsx")?;
        let (rows, total_rows) = parse_sheet_rows(&sheet_xml, &shared, max_rows)?;

        lines.push(format!("=== SHEET: {name} ==="));
        for row in rows {
            if !row.is_empty() {
                lines.push(row.join("\t"));
            }
        }
        if max_rows > 0 && total_rows > max_rows {
            lines.push(format!("... (limited to {max_rows} rows, {total_rows} total)"));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

/// Sheet `(name, relationship id)` pairs in workbook order.
fn parse_workbook_sheets(xml: &str) -> Result<Vec<(String, String)>, ExtractError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name")?.unwrap_or_else(|| "Sheet".to_string());
                if let Some(rid) = attribute(&e, b"r:id")? {
                    sheets.push((name, rid));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(decode_error(err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Relationship id to target-part map from `workbook.xml.rels`.
fn parse_rels(xml: &str) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) =
                    (attribute(&e, b"Id")?, attribute(&e, b"Target")?)
                {
                    rels.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(decode_error(err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Shared strings in index order; rich-text runs inside one `si` concatenate.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.clone()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                current.push_str(&t.unescape().map_err(decode_error)?);
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(decode_error(err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Renders rows up to `max_rows` (0 = unlimited) and counts the total.
fn parse_sheet_rows(
    xml: &str,
    shared: &[String],
    max_rows: u32,
) -> Result<(Vec<Vec<String>>, u32), ExtractError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut total_rows: u32 = 0;
    let mut cell_type = String::new();
    let mut cell_value = String::new();
    let mut in_value = false;
    let mut in_inline_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    total_rows += 1;
                    current_row.clear();
                }
                b"c" => {
                    cell_type = attribute(&e, b"t")?.unwrap_or_default();
                    cell_value.clear();
                }
                b"v" => in_value = true,
                b"t" => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => total_rows += 1,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"row" => {
                    if max_rows == 0 || total_rows <= max_rows {
                        rows.push(std::mem::take(&mut current_row));
                    }
                }
                b"c" => {
                    let rendered = render_cell(&cell_type, &cell_value, shared);
                    if !rendered.is_empty() {
                        current_row.push(rendered);
                    }
                }
                b"v" => in_value = false,
                b"t" => in_inline_t = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value || in_inline_t => {
                cell_value.push_str(&t.unescape().map_err(decode_error)?);
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(decode_error(err)),
            _ => {}
        }
        buf.clear();
    }

    Ok((rows, total_rows))
}

fn render_cell(cell_type: &str, value: &str, shared: &[String]) -> String {
    let resolved = if cell_type == "s" {
        value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|index| shared.get(index))
            .cloned()
            .unwrap_or_default()
    } else {
        value.to_string()
    };
    resolved.trim().to_string()
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ExtractError> {
    for attr in element.attributes() {
        let attr = attr.map_err(decode_error)?;
        if attr.key.as_ref() == key {
            return Ok(Some(
                attr.unescape_value().map_err(decode_error)?.into_owned(),
            ));
        }
    }
    Ok(None)
}

fn read_optional_entry(bytes: &[u8], entry: &str) -> Result<Option<String>, ExtractError> {
    let mut archive = open_zip(bytes, "xlsx")?;
    match archive.by_name(entry) {
        Ok(mut file) => {
            let mut xml = String::new();
            file.read_to_string(&mut xml)?;
            Ok(Some(xml))
        }
        Err(_) => Ok(None),
    }
}

/// Extracts text from legacy XLS workbooks via `xls2csv`.
pub struct XlsExtractor;

#[async_trait]
impl Extractor for XlsExtractor {
    fn name(&self) -> &'static str {
        "xls"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[XLS_MIME]
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["xls"]
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        file.mime_type.as_deref() == Some(XLS_MIME)
            || file.effective_extension().as_deref() == Some("xls")
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        if let Some(size) = file.size_bytes {
            if size > ctx.settings.office_max_bytes() {
                return Ok(ExtractedContent::size_limited("xls", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let mut metadata = Map::new();
        metadata.insert(
            "mime_type".to_string(),
            file.mime_type.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert("file_size_bytes".to_string(), Value::from(bytes.len()));

        let raw = run_decoder("xls2csv", "xls", ".xls", bytes).await?;
        let text = cap_rows(&raw, ctx.settings.max_rows_per_sheet);

        Ok(ExtractedContent {
            text,
            file_type: "xls".to_string(),
            metadata,
        })
    }
}

/// Bounds decoder output by line count; the CSV stream has no sheet markers,
/// so the per-sheet row cap applies to the whole document.
fn cap_rows(text: &str, max_rows: u32) -> String {
    let trimmed = text.trim();
    if max_rows == 0 {
        return trimmed.to_string();
    }

    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() as u32 <= max_rows {
        return trimmed.to_string();
    }

    let mut out: Vec<String> = lines[..max_rows as usize]
        .iter()
        .map(ToString::to_string)
        .collect();
    out.push(format!("... (limited to {max_rows} rows, {} total)", lines.len()));
    out.join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn xlsx_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn sample_workbook(sheet1_rows: &str) -> Vec<u8> {
        xlsx_bytes(&[
            (
                "xl/workbook.xml",
                r#"<workbook><sheets>
                    <sheet name="Data" sheetId="1" r:id="rId1"/>
                    <sheet name="Empty" sheetId="2" r:id="rId2"/>
                </sheets></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships>
                    <Relationship Id="rId1" Target="worksheets/sheet1.xml"/>
                    <Relationship Id="rId2" Target="worksheets/sheet2.xml"/>
                </Relationships>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>alpha</t></si><si><r><t>be</t></r><r><t>ta</t></r></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                sheet1_rows,
            ),
            ("xl/worksheets/sheet2.xml", "<worksheet><sheetData/></worksheet>"),
        ])
    }

    const SHEET1: &str = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
        <row r="2"><c r="A2"><v>42</v></c><c r="B2" t="inlineStr"><is><t>inline</t></is></c></row>
        <row r="3"/>
    </sheetData></worksheet>"#;

    #[test]
    fn test_xlsx_renders_sheets_rows_and_shared_strings() {
        let bytes = sample_workbook(SHEET1);
        let text = extract_xlsx(&bytes, 0, 0).unwrap();

        let expected = "=== SHEET: Data ===\nalpha\tbeta\n42\tinline\n\n=== SHEET: Empty ===\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_xlsx_sheet_cap_adds_marker() {
        let bytes = sample_workbook(SHEET1);
        let text = extract_xlsx(&bytes, 1, 0).unwrap();

        assert!(text.contains("=== SHEET: Data ==="));
        assert!(!text.contains("=== SHEET: Empty ==="));
        assert!(text.contains("... (limited to 1 sheets)"));
    }

    #[test]
    fn test_xlsx_row_cap_reports_total() {
        let bytes = sample_workbook(SHEET1);
        let text = extract_xlsx(&bytes, 0, 1).unwrap();

        assert!(text.contains("alpha\tbeta"));
        assert!(!text.contains("42"));
        assert!(text.contains("... (limited to 1 rows, 3 total)"));
    }

    #[test]
    fn test_cap_rows_pass_through_when_under_limit() {
        assert_eq!(cap_rows("a\nb\n", 5), "a\nb");
        assert_eq!(cap_rows("a\nb", 0), "a\nb");
    }

    #[test]
    fn test_cap_rows_truncates_with_marker() {
        let capped = cap_rows("a\nb\nc\nd", 2);
        assert_eq!(capped, "a\nb\n... (limited to 2 rows, 4 total)");
    }
}
