//! PDF text extraction, one record per page
//!
//! Pages without text are skipped; there is no OCR.

use crate::errors::IngestionError;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, warn};

/// Cleaned text of one page (1-based page number)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// Extract the text of every non-empty page of a PDF file
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>, IngestionError> {
    if !path.exists() {
        return Err(IngestionError::FileNotFound(path.display().to_string()));
    }

    let doc = Document::load(path).map_err(|e| IngestionError::PdfParse {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = extract_document_pages(&doc);
    debug!(path = %path.display(), pages = pages.len(), "Text extraction complete");
    Ok(pages)
}

/// Extract page texts from an already loaded document
pub fn extract_document_pages(doc: &Document) -> Vec<PageText> {
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut out = Vec::with_capacity(pages.len());
    for (&page, &page_id) in pages.iter() {
        let raw = match doc.extract_text(&[page]) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => match doc.get_page_content(page_id) {
                Ok(content) => extract_text_from_content(&content),
                Err(e) => {
                    warn!(page, error = %e, "Failed to read page content, skipping");
                    continue;
                }
            },
        };

        let text = clean_text(&raw);
        if text.is_empty() {
            debug!(page, "Page has no text, skipping");
            continue;
        }
        out.push(PageText { page, text });
    }
    out
}

/// Fallback parser for content streams lopdf cannot decode: text shown
/// between BT and ET by Tj, TJ, ' and "
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let trimmed = line.trim();
        match trimmed {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                text.push('\n');
            }
            _ if in_text_block => {
                if let Some(shown) = extract_text_from_operator(trimmed) {
                    text.push_str(&shown);
                    text.push(' ');
                }
            }
            _ => {}
        }
    }

    text
}

fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        return (start < end).then(|| decode_pdf_string(&line[start + 1..end]));
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut current = String::new();
        let mut in_paren = false;
        let mut escaped = false;

        for ch in line.chars() {
            if in_paren && escaped {
                current.push('\\');
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_paren => escaped = true,
                '(' if !in_paren => in_paren = true,
                ')' if in_paren => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }
        return (!result.is_empty()).then_some(result);
    }

    None
}

/// Decode PDF literal string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(c) => result.push(c),
            None => {}
        }
    }

    result
}

/// Collapse whitespace and drop byte order marks and soft hyphens
fn clean_text(text: &str) -> String {
    text.replace(['\u{FEFF}', '\u{00AD}'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    /// Build an uncompressed PDF with one page per entry; empty entries
    /// produce pages with no text operators
    pub(crate) fn build_pdf(pages: &[&str]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("Hello   World\n\nTest"), "Hello World Test");
        assert_eq!(clean_text("\u{FEFF}pro\u{00AD}ducto"), "producto");
        assert_eq!(clean_text(" \n\t "), "");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
    }

    #[test]
    fn test_operator_fallback() {
        assert_eq!(extract_text_from_operator("(Lavar con agua) Tj").as_deref(), Some("Lavar con agua"));
        assert_eq!(
            extract_text_from_operator("[(Primeros) -250 (auxilios)] TJ").as_deref(),
            Some("Primerosauxilios")
        );
        assert_eq!(extract_text_from_operator("72 720 Td"), None);

        let content = b"BT\n/F1 12 Tf\n(Contacto ocular) Tj\nET\n";
        assert_eq!(clean_text(&extract_text_from_content(content)), "Contacto ocular");
    }

    #[test]
    fn test_pages_keep_numbers_and_skip_empty() {
        let doc = build_pdf(&["Seccion 1 Identificacion", "", "Seccion 4 Primeros auxilios"]);
        let pages = extract_document_pages(&doc);

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert!(pages[0].text.contains("Identificacion"));
        assert_eq!(pages[1].page, 3);
        assert!(pages[1].text.contains("Primeros auxilios"));
    }

    #[test]
    fn test_missing_file() {
        let err = extract_pages(Path::new("/nonexistent/sdsforge/ficha.pdf")).unwrap_err();
        assert!(matches!(err, IngestionError::FileNotFound(_)));
    }
}
