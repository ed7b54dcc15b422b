use crate::chunking::normalize_fragment_text;
use crate::error::{ExtractionWarning, IngestError};
use crate::models::{Location, LocationKind, SourceFormat, TextFragment};
use lopdf::Document;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use tracing::warn;

const DOCX_BODY_ENTRY: &str = "word/document.xml";
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turns raw file bytes into located text fragments, in reading order.
pub trait TextExtractor {
    fn format(&self) -> SourceFormat;
    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextFragment>, IngestError>;
}

/// One fragment per page with a text layer.
#[derive(Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextFragment>, IngestError> {
        let document = Document::load_mem(bytes).map_err(|error| pdf_error(error.to_string()))?;
        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(pdf_error("document has no pages".to_string()));
        }

        let mut fragments = Vec::new();
        let mut failures = 0usize;
        for page_no in pages.keys() {
            match document.extract_text(&[*page_no]) {
                Ok(text) => fragments.push(TextFragment {
                    text,
                    location: Location::at(LocationKind::Page, *page_no),
                }),
                Err(error) => {
                    failures += 1;
                    warn!(page = page_no, error = %error, "skipping unreadable pdf page");
                }
            }
        }

        if failures == pages.len() {
            return Err(pdf_error(format!("none of {} pages could be read", pages.len())));
        }

        Ok(fragments)
    }
}

fn pdf_error(details: String) -> IngestError {
    IngestError::Extraction {
        format: SourceFormat::Pdf,
        details,
    }
}

/// One fragment per non-empty `w:p` paragraph of `word/document.xml`,
/// numbered by the paragraph's position in the body.
#[derive(Default)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextFragment>, IngestError> {
        let body = read_docx_body(bytes)?;
        paragraphs_from_xml(&body)
    }
}

fn docx_error(details: impl Into<String>) -> IngestError {
    IngestError::Extraction {
        format: SourceFormat::Docx,
        details: details.into(),
    }
}

fn read_docx_body(bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| docx_error(error.to_string()))?;
    let entry = archive
        .by_name(DOCX_BODY_ENTRY)
        .map_err(|error| docx_error(format!("{DOCX_BODY_ENTRY}: {error}")))?;

    let mut body = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut body)
        .map_err(|error| docx_error(error.to_string()))?;
    if body.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(docx_error(format!("{DOCX_BODY_ENTRY} exceeds size limit")));
    }
    Ok(body)
}

fn paragraphs_from_xml(xml: &[u8]) -> Result<Vec<TextFragment>, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut paragraph_index = 0u32;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    paragraph_index += 1;
                    if !current.trim().is_empty() {
                        fragments.push(TextFragment {
                            text: std::mem::take(&mut current),
                            location: Location::at(LocationKind::Paragraph, paragraph_index),
                        });
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"tab" | b"br" | b"cr" => current.push(' '),
                b"p" => paragraph_index += 1,
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text.unescape().map_err(|error| docx_error(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(docx_error(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(fragments)
}

/// One fragment per non-blank line; invalid UTF-8 is replaced, not rejected.
#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Txt
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextFragment>, IngestError> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

        Ok(text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| TextFragment {
                text: line.trim().to_string(),
                location: Location::at(LocationKind::Line, index as u32 + 1),
            })
            .collect())
    }
}

pub fn extractor_for(format: SourceFormat) -> Box<dyn TextExtractor + Send + Sync> {
    match format {
        SourceFormat::Pdf => Box::new(LopdfExtractor),
        SourceFormat::Docx => Box::new(DocxExtractor),
        SourceFormat::Txt => Box::new(PlainTextExtractor),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub format: SourceFormat,
    pub fragments: Vec<TextFragment>,
    pub warning: Option<ExtractionWarning>,
}

/// Extracts and normalizes a document's text.
///
/// Fragments whose text normalizes to nothing are dropped. A document with
/// no text left is still a success, flagged with [`ExtractionWarning::EmptyText`].
pub fn extract(bytes: &[u8], format: SourceFormat) -> Result<Extraction, IngestError> {
    let fragments: Vec<TextFragment> = extractor_for(format)
        .extract(bytes)?
        .into_iter()
        .filter_map(|fragment| {
            let text = normalize_fragment_text(&fragment.text);
            (!text.is_empty()).then_some(TextFragment {
                text,
                location: fragment.location,
            })
        })
        .collect();

    let warning = fragments.is_empty().then_some(ExtractionWarning::EmptyText);
    Ok(Extraction {
        format,
        fragments,
        warning,
    })
}

/// Like [`extract`], detecting the format from the file name's extension.
pub fn extract_named(filename: &str, bytes: &[u8]) -> Result<Extraction, IngestError> {
    let format = SourceFormat::from_filename(filename)
        .ok_or_else(|| IngestError::UnsupportedFormat(filename.to_string()))?;
    extract(bytes, format)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|text| {
                if text.is_empty() {
                    "<w:p/>".to_string()
                } else {
                    format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>")
                }
            })
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body}</w:body></w:document>"
        );

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", SimpleFileOptions::default())
                .expect("start docx entry");
            zip.write_all(xml.as_bytes()).expect("write docx entry");
            zip.finish().expect("finish docx");
        }
        buf
    }

    pub fn pdf(pages: &[&str]) -> Vec<u8> {
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
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
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

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }
}
