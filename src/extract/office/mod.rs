//! Office document extraction.
//!
//! Modern formats (docx/xlsx/pptx) are zip archives of XML parts and are
//! decoded in-process. Legacy binary formats (doc/xls/ppt) go through the
//! catdoc suite of out-of-process decoders: bytes land in a temp file, the
//! tool's stdout becomes the text, and the temp file is removed on every exit
//! path.

pub mod excel;
pub mod powerpoint;
pub mod word;

use std::io::{Cursor, Read, Write};

use super::ExtractError;

/// Runs `tool <tempfile>` over `bytes` and returns captured stdout as text.
pub(crate) async fn run_decoder(
    tool: &'static str,
    format: &'static str,
    suffix: &str,
    bytes: Vec<u8>,
) -> Result<String, ExtractError> {
    let mut tmp = tempfile::Builder::new().suffix(suffix).tempfile()?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;

    let result = tokio::process::Command::new(tool)
        .arg(tmp.path())
        .output()
        .await;
    // `tmp` drops below on every path, deleting the file.

    let output = match result {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractError::MissingTool { format, tool });
        }
        Err(err) => return Err(ExtractError::Io(err)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ExtractError::ToolFailed {
            tool,
            format,
            stderr: if stderr.is_empty() {
                "unknown error".to_string()
            } else {
                stderr
            },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Reads one named entry out of a zip archive held in memory.
pub(crate) fn read_zip_entry(
    bytes: &[u8],
    entry: &str,
    format: &'static str,
) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes, format)?;
    let mut file = archive.by_name(entry).map_err(|err| ExtractError::Decode {
        format,
        message: format!("missing archive entry {entry}: {err}"),
    })?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(xml)
}

pub(crate) fn open_zip<'a>(
    bytes: &'a [u8],
    format: &'static str,
) -> Result<zip::ZipArchive<Cursor<&'a [u8]>>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| ExtractError::Decode {
        format,
        message: format!("not a valid archive: {err}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_is_a_descriptive_error() {
        let error = run_decoder("definitely-not-installed-anywhere", "doc", ".doc", vec![1, 2])
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::MissingTool { tool: "definitely-not-installed-anywhere", .. }));
        assert!(error.to_string().contains("requires"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_a_tool_failure() {
        let error = run_decoder("false", "doc", ".doc", vec![]).await.unwrap_err();
        assert!(matches!(error, ExtractError::ToolFailed { .. }));
        assert!(error.to_string().contains("unknown error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_captured_as_text() {
        // `cat <file>` echoes the temp file contents back.
        let text = run_decoder("cat", "doc", ".doc", b"legacy body".to_vec())
            .await
            .unwrap();
        assert_eq!(text, "legacy body");
    }

    #[test]
    fn test_read_zip_entry_reports_missing_entries() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let error = read_zip_entry(&bytes, "word/document.xml", "docx").unwrap_err();
        assert!(error.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_garbage_bytes_are_not_an_archive() {
        let error = open_zip(b"not a zip", "docx").unwrap_err();
        assert!(matches!(error, ExtractError::Decode { format: "docx", .. }));
    }
}
