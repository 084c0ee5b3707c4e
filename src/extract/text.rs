//! Plain text and source-code extraction.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::provider::FileDescriptor;

use super::{ExtractError, ExtractedContent, ExtractionContext, Extractor};

const MIME_PREFIXES: [&str; 1] = ["text/"];

const EXTRA_MIME_TYPES: [&str; 6] = [
    "application/json",
    "application/xml",
    "application/javascript",
    "application/yaml",
    "application/x-yaml",
    "application/x-python-code",
];

const FILE_EXTENSIONS: [&str; 44] = [
    "txt", "md", "markdown", "rst", "log", "csv", "tsv", "json", "yaml", "yml", "toml", "ini",
    "cfg", "conf", "py", "pyw", "pyi", "js", "jsx", "ts", "tsx", "html", "htm", "css", "xml",
    "sh", "bash", "zsh", "fish", "rb", "php", "go", "rs", "java", "c", "h", "cpp", "hpp", "cs",
    "swift", "kt", "sql", "proto", "dockerfile",
];

/// Normalized file-type tag for a given extension.
fn normalized_file_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("py" | "pyw" | "pyi") => "python",
        Some("js" | "jsx") => "javascript",
        Some("ts" | "tsx") => "typescript",
        Some("yaml" | "yml") => "yaml",
        Some("md" | "markdown") => "markdown",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("sh" | "bash" | "zsh" | "fish") => "shell",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("csv") => "csv",
        _ => "text",
    }
}

/// Extracts UTF-8 text from plain-text and code files.
pub struct TextExtractor;

#[async_trait]
impl Extractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn mime_types(&self) -> &[&'static str] {
        &EXTRA_MIME_TYPES
    }

    fn mime_prefixes(&self) -> &[&'static str] {
        &MIME_PREFIXES
    }

    fn file_extensions(&self) -> &[&'static str] {
        &FILE_EXTENSIONS
    }

    fn can_extract(&self, file: &FileDescriptor) -> bool {
        let mime = file.mime_type.as_deref().unwrap_or("");
        if mime.starts_with("text/") || EXTRA_MIME_TYPES.contains(&mime) {
            return true;
        }
        file.effective_extension()
            .is_some_and(|ext| FILE_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError> {
        let max_bytes = ctx.settings.text_max_bytes();
        if let Some(size) = file.size_bytes {
            if size > max_bytes {
                return Ok(ExtractedContent::size_limited("text", size));
            }
        }

        let bytes = ctx.download_binary(&file.id).await?;
        let content = String::from_utf8_lossy(&bytes).trim().to_string();
        let extension = file.effective_extension();

        let mut metadata = Map::new();
        metadata.insert(
            "original_mime".to_string(),
            file.mime_type.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert(
            "extension".to_string(),
            extension.clone().map_or(Value::Null, Value::from),
        );
        metadata.insert("file_size_bytes".to_string(), Value::from(bytes.len()));

        Ok(ExtractedContent {
            text: content,
            file_type: normalized_file_type(extension.as_deref()).to_string(),
            metadata,
        })
    }
}
