//! Per-page text extraction from PDF profile documents.

use crate::documents::DocumentMetadata;
use folio_core::{FolioError, FolioResult};
use lopdf::{Dictionary, Document, Object};
use std::io;
use tracing::debug;

/// Text of one PDF page with the metadata its chunks inherit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    /// Extracted page text.
    pub text: String,
    /// Source, page and document-info metadata.
    pub metadata: DocumentMetadata,
}

fn invalid(source: &str, e: lopdf::Error) -> FolioError {
    FolioError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{source}: unreadable PDF: {e}"),
    ))
}

/// Decode a PDF text string: UTF-16BE when it carries a byte-order mark,
/// otherwise treated as single-byte text.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => bytes.iter().map(|b| char::from(*b)).collect(),
        },
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    doc.trailer
        .get_deref(b"Info", doc)
        .and_then(Object::as_dict)
        .ok()
}

fn info_field(info: Option<&Dictionary>, key: &[u8]) -> String {
    info.and_then(|dict| dict.get(key).ok())
        .and_then(|value| value.as_str().ok())
        .map(decode_text_string)
        .unwrap_or_default()
}

/// Metadata shared by every page of `doc`, taken from its Info dictionary.
fn document_metadata(doc: &Document, source: &str, total_pages: usize) -> DocumentMetadata {
    let info = info_dictionary(doc);
    DocumentMetadata {
        producer: info_field(info, b"Producer"),
        creator: info_field(info, b"Creator"),
        creationdate: info_field(info, b"CreationDate"),
        author: info_field(info, b"Author"),
        moddate: info_field(info, b"ModDate"),
        subject: info_field(info, b"Subject"),
        title: info_field(info, b"Title"),
        trapped: info_field(info, b"Trapped"),
        total_pages: i64::try_from(total_pages).unwrap_or(i64::MAX),
        ..DocumentMetadata::for_source(source)
    }
}

/// Load `bytes` as a PDF and extract the text of every page.
///
/// Pages are numbered from zero in `page`; `page_label` holds the printed
/// one-based number. A page whose text cannot be extracted yields an empty
/// page rather than failing the document.
pub fn load_pages(bytes: &[u8], source: &str) -> FolioResult<Vec<PdfPage>> {
    let doc = Document::load_mem(bytes).map_err(|e| invalid(source, e))?;
    let pages = doc.get_pages();
    let base = document_metadata(&doc, source, pages.len());

    let mut loaded = Vec::with_capacity(pages.len());
    for (index, number) in pages.keys().enumerate() {
        let text = doc.extract_text(&[*number]).unwrap_or_else(|e| {
            debug!(source, page = *number, error = %e, "No text extracted from page");
            String::new()
        });
        loaded.push(PdfPage {
            text,
            metadata: DocumentMetadata {
                page: i64::try_from(index).unwrap_or(i64::MAX),
                page_label: number.to_string(),
                ..base.clone()
            },
        });
    }
    Ok(loaded)
}
