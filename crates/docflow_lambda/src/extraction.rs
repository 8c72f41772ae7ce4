//! Text extraction for the document formats accepted at ingestion.

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use docflow_core::contract::{truncate_chars, ContentMetadata, ExtractedDocument, SourceLocation};
use docflow_core::error::{Capability, CapabilityError};
use regex::{Captures, Regex};
use serde_json::Value;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const SHORT_TEXT_CHARS: usize = 10;
const DOCX_BODY_PART: &str = "word/document.xml";

static PARAGRAPH_PATTERN: OnceLock<Regex> = OnceLock::new();
static TEXT_RUN_PATTERN: OnceLock<Regex> = OnceLock::new();
static ENTITY_PATTERN: OnceLock<Regex> = OnceLock::new();

struct DecodedText {
    content: String,
    method: &'static str,
    warnings: Vec<String>,
    json_keys: Option<Vec<String>>,
}

impl DecodedText {
    fn new(content: String, method: &'static str) -> Self {
        Self {
            content,
            method,
            warnings: Vec::new(),
            json_keys: None,
        }
    }
}

/// Extracts text from `bytes` and truncates it to `max_content_chars`.
///
/// Metadata describes the full text; `full_content_location` points back at
/// the source object when the stored content was cut.
pub fn extract_document(
    source: &SourceLocation,
    bytes: &[u8],
    max_content_chars: usize,
) -> Result<ExtractedDocument, CapabilityError> {
    let extension = source.extension();
    let decoded = match extension.as_str() {
        ".txt" | ".md" | ".csv" => decode_text(bytes),
        ".json" => decode_json(bytes)?,
        ".docx" => decode_docx(bytes)?,
        ".doc" => {
            return Err(extraction_error(
                "legacy .doc files are not supported, convert to .docx",
            ))
        }
        ".pdf" => return Err(extraction_error("PDF text extraction is not available")),
        other => {
            return Err(extraction_error(format!(
                "unsupported file type '{other}'"
            )))
        }
    };

    let DecodedText {
        content,
        method,
        mut warnings,
        json_keys,
    } = decoded;

    if content.trim().is_empty() {
        return Err(extraction_error(format!(
            "no text could be extracted from '{}'",
            source.filename()
        )));
    }
    if content.trim().chars().count() < SHORT_TEXT_CHARS {
        warnings.push("Extracted text is very short".to_string());
    }

    let mut metadata = ContentMetadata::from_text(&content);
    metadata.json_keys = json_keys;
    let full_content_length = metadata.content_length;
    let (stored, content_truncated) = truncate_chars(&content, max_content_chars);

    Ok(ExtractedDocument {
        filename: source.filename().to_string(),
        file_extension: extension,
        file_size: bytes.len(),
        extraction_method: method.to_string(),
        content: stored,
        content_truncated,
        full_content_length,
        full_content_location: content_truncated.then(|| source.uri()),
        warnings,
        metadata,
    })
}

fn decode_text(bytes: &[u8]) -> DecodedText {
    if let Some(stripped) = bytes.strip_prefix(UTF8_BOM) {
        if let Ok(text) = std::str::from_utf8(stripped) {
            return DecodedText::new(text.to_string(), "text_decode_utf-8-sig");
        }
    } else if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText::new(text.to_string(), "text_decode_utf-8");
    }

    // Latin-1 maps every byte to the code point of the same value.
    let text = bytes.iter().map(|byte| char::from(*byte)).collect();
    let mut decoded = DecodedText::new(text, "text_decode_latin-1");
    decoded
        .warnings
        .push("Decoded as Latin-1, some characters might be corrupted".to_string());
    decoded
}

fn decode_json(bytes: &[u8]) -> Result<DecodedText, CapabilityError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|error| extraction_error(format!("invalid JSON file: {error}")))?;
    let content = serde_json::to_string_pretty(&value)
        .map_err(|error| extraction_error(format!("failed to format JSON: {error}")))?;

    let mut decoded = DecodedText::new(content, "json_parse");
    decoded.json_keys = value
        .as_object()
        .map(|object| object.keys().cloned().collect());
    Ok(decoded)
}

fn decode_docx(bytes: &[u8]) -> Result<DecodedText, CapabilityError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| extraction_error(format!("not a valid .docx container: {error}")))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY_PART)
        .map_err(|error| extraction_error(format!("missing {DOCX_BODY_PART}: {error}")))?
        .read_to_string(&mut xml)
        .map_err(|error| extraction_error(format!("unreadable {DOCX_BODY_PART}: {error}")))?;

    Ok(DecodedText::new(docx_paragraphs(&xml).join("\n"), "docx_xml"))
}

/// Non-empty paragraph texts from a WordprocessingML body, in document order.
pub fn docx_paragraphs(xml: &str) -> Vec<String> {
    let paragraphs = PARAGRAPH_PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<w:p(?:\s[^>]*)?>(.*?)</w:p>").expect("paragraph pattern should compile")
    });
    let runs = TEXT_RUN_PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>").expect("text run pattern should compile")
    });

    paragraphs
        .captures_iter(xml)
        .map(|paragraph| {
            runs.captures_iter(&paragraph[1])
                .map(|run| unescape_xml(&run[1]))
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn unescape_xml(text: &str) -> String {
    let entities = ENTITY_PATTERN.get_or_init(|| {
        Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-z]+);").expect("entity pattern should compile")
    });

    entities
        .replace_all(text, |captures: &Captures<'_>| {
            let entity = &captures[1];
            let resolved = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            resolved
                .map(String::from)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn extraction_error(message: impl Into<String>) -> CapabilityError {
    CapabilityError::new(Capability::Extraction, message)
}
