use crate::error::ExtractionWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Docx,
    Txt,
}

impl SourceFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "text" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        Self::from_extension(extension)
    }

    /// The unit a location token counts in for this format.
    pub fn location_kind(self) -> LocationKind {
        match self {
            Self::Pdf => LocationKind::Page,
            Self::Docx => LocationKind::Paragraph,
            Self::Txt => LocationKind::Line,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Page,
    Paragraph,
    Line,
}

/// A 1-based, inclusive range of pages, paragraphs or lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    pub kind: LocationKind,
    pub start: u32,
    pub end: u32,
}

impl Location {
    pub fn at(kind: LocationKind, index: u32) -> Self {
        Self {
            kind,
            start: index,
            end: index,
        }
    }

    pub fn through(self, other: Location) -> Self {
        Self {
            kind: self.kind,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (singular, plural) = match self.kind {
            LocationKind::Page => ("page", "pages"),
            LocationKind::Paragraph => ("paragraph", "paragraphs"),
            LocationKind::Line => ("line", "lines"),
        };
        if self.start == self.end {
            write!(f, "{singular} {}", self.start)
        } else {
            write!(f, "{plural} {}-{}", self.start, self.end)
        }
    }
}

/// One positioned piece of extracted text, in reading order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub location: Location,
}

/// Byte span of a fragment inside the joined document text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentSpan {
    pub location: Location,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub source_format: SourceFormat,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
    pub fragment_count: usize,
    #[serde(default)]
    pub warnings: Vec<ExtractionWarning>,
}

/// Identity of a chunk: owning document plus its position in that document.
///
/// Ordered by sequence first, then document id, which is the tie-break order
/// used when two search hits score the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChunkId {
    pub document_id: String,
    pub sequence: u32,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            document_id: document_id.into(),
            sequence,
        }
    }
}

impl Ord for ChunkId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.document_id.cmp(&other.document_id))
    }
}

impl PartialOrd for ChunkId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.sequence)
    }
}

impl FromStr for ChunkId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (document_id, sequence) = value
            .rsplit_once('#')
            .ok_or_else(|| format!("chunk id has no sequence: {value}"))?;
        let sequence = sequence
            .parse::<u32>()
            .map_err(|error| format!("invalid chunk sequence in {value}: {error}"))?;
        if document_id.is_empty() {
            return Err(format!("chunk id has no document: {value}"));
        }
        Ok(Self::new(document_id, sequence))
    }
}

impl From<ChunkId> for String {
    fn from(value: ChunkId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ChunkId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    /// Leading bytes of `text` repeated from the previous chunk.
    pub overlap_bytes: usize,
    pub token_count: usize,
    pub location: Location,
    pub text_hash: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// The part of the chunk not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.overlap_bytes..).unwrap_or_default()
    }
}

/// A document together with everything persisted for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document: Document,
    pub fragments: Vec<FragmentSpan>,
    pub chunks: Vec<Chunk>,
}

impl StoredDocument {
    /// Rebuilds the full extracted text from the chunks' non-overlapping parts.
    pub fn text(&self) -> String {
        crate::chunking::reconstruct_text(&self.chunks)
    }

    /// Re-slices the reconstructed text back into its located fragments.
    pub fn text_fragments(&self) -> Vec<TextFragment> {
        let text = self.text();
        self.fragments
            .iter()
            .filter_map(|span| {
                text.get(span.start..span.end).map(|slice| TextFragment {
                    text: slice.to_string(),
                    location: span.location,
                })
            })
            .collect()
    }

    pub fn chunk(&self, sequence: u32) -> Option<&Chunk> {
        self.chunks
            .get(sequence as usize)
            .filter(|chunk| chunk.id.sequence == sequence)
            .or_else(|| self.chunks.iter().find(|chunk| chunk.id.sequence == sequence))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    /// Restrict the search to these document ids.
    #[serde(default)]
    pub document_filter: Option<BTreeSet<String>>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            document_filter: None,
        }
    }

    pub fn within<I, T>(mut self, document_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.document_filter = Some(document_ids.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub filename: String,
    pub location: Location,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.filename, self.location)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub snippet: String,
    pub citation: Citation,
}
