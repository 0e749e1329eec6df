//! Plain-text extraction from `.docx` uploads.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

const DOCUMENT_PART: &str = "word/document.xml";

/// Errors reading an uploaded document.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("not a valid .docx archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("malformed document XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("document has no word/document.xml part")]
    MissingDocumentBody,

    #[error("document body exceeds the {0} byte limit")]
    TooLarge(usize),
}

/// Return the document's paragraphs, one per line.
///
/// At most `max_xml_bytes` of `word/document.xml` are inflated; a larger body
/// is rejected with `TooLarge`, whatever size the archive header declares.
pub fn extract_text(bytes: &[u8], max_xml_bytes: usize) -> Result<String, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut part = match archive.by_name(DOCUMENT_PART) {
        Ok(part) => part,
        Err(zip::result::ZipError::FileNotFound) => return Err(ImportError::MissingDocumentBody),
        Err(e) => return Err(e.into()),
    };

    let limit = max_xml_bytes as u64;
    if part.size() > limit {
        return Err(ImportError::TooLarge(max_xml_bytes));
    }
    let mut xml = String::new();
    (&mut part).take(limit + 1).read_to_string(&mut xml)?;
    if xml.len() > max_xml_bytes {
        return Err(ImportError::TooLarge(max_xml_bytes));
    }
    paragraphs_from_xml(&xml)
}

fn paragraphs_from_xml(xml: &str) -> Result<String, ImportError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" | b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => text.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LIMIT: usize = 1024 * 1024;

    /// Wrap paragraphs in a minimal `.docx` container.
    fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
        );

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extracts_paragraph_lines() {
        let bytes = build_docx(&["Patient 1", "VHID: VH-1", "Name: Asha &amp; Co"]);
        let text = extract_text(&bytes, LIMIT).unwrap();
        assert_eq!(text, "Patient 1\nVHID: VH-1\nName: Asha & Co\n");
    }

    #[test]
    fn test_runs_tabs_and_breaks() {
        let xml = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>Name:</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> Ravi</w:t></w:r></w:p>
            <w:p><w:r><w:t>Line one</w:t><w:br/><w:t>Line two</w:t></w:r></w:p>
            <w:p/>
        </w:body></w:document>"#;
        let text = paragraphs_from_xml(xml).unwrap();
        assert_eq!(text, "Name:\t Ravi\nLine one\nLine two\n\n");
    }

    #[test]
    fn test_rejects_non_zip() {
        let err = extract_text(b"plain text, not a docx", LIMIT).unwrap_err();
        assert!(matches!(err, ImportError::Zip(_)));
    }

    #[test]
    fn test_missing_document_part() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<w:styles/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = extract_text(&bytes, LIMIT).unwrap_err();
        assert!(matches!(err, ImportError::MissingDocumentBody));
    }

    #[test]
    fn test_rejects_body_that_inflates_past_limit() {
        let padding = "x".repeat(4 * 1024 * 1024);
        let bytes = build_docx(&["Patient 1", &padding]);
        assert!(bytes.len() < 64 * 1024);

        let err = extract_text(&bytes, LIMIT).unwrap_err();
        assert!(matches!(err, ImportError::TooLarge(LIMIT)));

        let text = extract_text(&bytes, 8 * 1024 * 1024).unwrap();
        assert!(text.starts_with("Patient 1\n"));
    }
}
