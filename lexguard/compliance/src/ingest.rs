use std::path::Path;

use crate::error::IngestError;

/// Turns a source file into plain text for the pipeline.
pub trait DocumentIngestor: Send + Sync {
    /// Extracts text from `bytes` read from the file `name`.
    fn extract_text(&self, name: &str, bytes: &[u8]) -> Result<String, IngestError>;
}

/// Ingestor for UTF-8 text sources (`.txt`, `.md`, `.text`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextIngestor;

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "text"];

impl DocumentIngestor for PlainTextIngestor {
    fn extract_text(&self, name: &str, bytes: &[u8]) -> Result<String, IngestError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(IngestError::UnsupportedFormat(if extension.is_empty() {
                format!("`{name}` has no extension")
            } else {
                format!(".{extension}")
            }));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|err| IngestError::Corrupt(format!("`{name}` is not valid UTF-8: {err}")))?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(text).replace("\r\n", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_text_and_normalises_newlines() {
        let text = PlainTextIngestor
            .extract_text("DPA.TXT", "\u{feff}1. Scope\r\n2. Retention".as_bytes())
            .unwrap();
        assert_eq!(text, "1. Scope\n2. Retention");
    }

    #[test]
    fn rejects_binary_formats() {
        let err = PlainTextIngestor.extract_text("contract.pdf", b"%PDF").unwrap_err();
        assert_eq!(err, IngestError::UnsupportedFormat(".pdf".into()));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let err = PlainTextIngestor
            .extract_text("notes.txt", &[0xff, 0xfe, 0x00])
            .unwrap_err();
        assert!(matches!(err, IngestError::Corrupt(_)));
    }
}
