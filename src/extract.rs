//! Text extraction for source documents.
//!
//! Plain text and markdown are decoded as UTF-8 with invalid sequences
//! replaced. PDF goes through `pdf-extract`; DOCX is read from
//! `word/document.xml` with one line per paragraph. Failures are returned
//! as [`ExtractError`] and the indexer skips the document.

use std::io::Read;

use rca_harness_core::error::ExtractError;
use rca_harness_core::models::DocumentFormat;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Detect the format of `uri` from its extension and extract its text.
pub fn extract_document(uri: &str, bytes: &[u8]) -> Result<(DocumentFormat, String), ExtractError> {
    let format = DocumentFormat::from_uri(uri)
        .ok_or_else(|| ExtractError::UnsupportedFormat(uri.to_string()))?;
    Ok((format, extract_text(bytes, format)?))
}

/// Extract plain text from `bytes` of the given format.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::PlainText | DocumentFormat::Markdown => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
    }
}

fn corrupt(format: &'static str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Corrupt {
        format,
        message: e.to_string(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| corrupt("pdf", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| corrupt("docx", e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| corrupt("docx", "word/document.xml not found"))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| corrupt("docx", e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(corrupt("docx", "word/document.xml exceeds size limit"));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` text, one line per `w:p` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = true;
                    current.clear();
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if in_paragraph => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"p" => paragraphs.push(String::new()),
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().map_err(|e| corrupt("docx", e))?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    in_paragraph = false;
                    paragraphs.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt("docx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs.join("\n"))
}
