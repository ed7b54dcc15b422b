use crate::error::IngestError;
use crate::models::{Chunk, ChunkId, FragmentSpan, Location, TextFragment};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_TARGET_TOKENS: usize = 500;
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.1;

const FRAGMENT_SEPARATOR: char = '\n';

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
        }
    }
}

impl ChunkingConfig {
    pub fn overlap_tokens(&self) -> usize {
        (self.target_tokens as f64 * self.overlap_ratio).floor() as usize
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "target_tokens must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_ratio must be in [0, 1), got {}",
                self.overlap_ratio
            )));
        }
        Ok(())
    }
}

/// Byte range of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Splits on whitespace; runs of alphanumerics form one token and every other
/// visible character is a token of its own.
pub fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (offset, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if word_start.is_none() {
                word_start = Some(offset);
            }
            continue;
        }

        if let Some(start) = word_start.take() {
            tokens.push(TokenSpan { start, end: offset });
        }
        if !ch.is_whitespace() {
            tokens.push(TokenSpan {
                start: offset,
                end: offset + ch.len_utf8(),
            });
        }
    }

    if let Some(start) = word_start {
        tokens.push(TokenSpan {
            start,
            end: text.len(),
        });
    }

    tokens
}

pub fn token_texts(text: &str) -> impl Iterator<Item = &str> {
    tokenize(text)
        .into_iter()
        .map(move |span| &text[span.start..span.end])
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Line-preserving cleanup applied to every extracted fragment.
pub fn normalize_fragment_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace(['\r', '\u{000c}'], "\n")
        .replace('\u{a0}', " ")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

/// Joins fragments with a newline and records where each one landed.
pub fn join_fragments(fragments: &[TextFragment]) -> (String, Vec<FragmentSpan>) {
    let mut text = String::new();
    let mut spans = Vec::with_capacity(fragments.len());

    for (index, fragment) in fragments.iter().enumerate() {
        if index > 0 {
            text.push(FRAGMENT_SEPARATOR);
        }
        let start = text.len();
        text.push_str(&fragment.text);
        spans.push(FragmentSpan {
            location: fragment.location,
            start,
            end: text.len(),
        });
    }

    (text, spans)
}

/// A planned chunk over the joined text, before ids and embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub start: usize,
    pub end: usize,
    pub overlap_bytes: usize,
    pub token_count: usize,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct ChunkedText {
    pub text: String,
    pub fragments: Vec<FragmentSpan>,
    pub pieces: Vec<ChunkPiece>,
}

pub fn chunk_fragments(
    fragments: &[TextFragment],
    config: &ChunkingConfig,
) -> Result<ChunkedText, IngestError> {
    config.validate()?;
    let (text, spans) = join_fragments(fragments);
    let tokens = tokenize(&text);
    let pieces = plan_pieces(&text, &tokens, &spans, config);

    Ok(ChunkedText {
        text,
        fragments: spans,
        pieces,
    })
}

/// Cuts a window every `target_tokens` tokens and seeds the next window with
/// the last `overlap_tokens` of it. Windows are contiguous: each one ends where
/// the next one's fresh text begins, so the first and last windows also absorb
/// leading and trailing whitespace.
fn plan_pieces(
    text: &str,
    tokens: &[TokenSpan],
    spans: &[FragmentSpan],
    config: &ChunkingConfig,
) -> Vec<ChunkPiece> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let target = config.target_tokens;
    let overlap = config.overlap_tokens();
    let mut pieces = Vec::new();
    let mut first = 0usize;
    let mut begin = 0usize;
    let mut overlap_bytes = 0usize;

    loop {
        let window_end = (first + target).min(tokens.len());
        let end = if window_end == tokens.len() {
            text.len()
        } else {
            tokens[window_end].start
        };

        let location = locate(spans, tokens[first].start)
            .through(locate(spans, tokens[window_end - 1].start));

        pieces.push(ChunkPiece {
            start: begin,
            end,
            overlap_bytes,
            token_count: window_end - first,
            location,
        });

        if window_end == tokens.len() {
            break;
        }

        let next_first = window_end - overlap;
        let next_begin = tokens[next_first].start;
        overlap_bytes = end - next_begin;
        first = next_first;
        begin = next_begin;
    }

    pieces
}

fn locate(spans: &[FragmentSpan], offset: usize) -> Location {
    let position = spans
        .partition_point(|span| span.start <= offset)
        .saturating_sub(1);
    spans[position].location
}

pub fn build_chunks(document_id: &str, chunked: &ChunkedText) -> Vec<Chunk> {
    chunked
        .pieces
        .iter()
        .enumerate()
        .map(|(sequence, piece)| {
            let text = chunked.text[piece.start..piece.end].to_string();
            Chunk {
                id: ChunkId::new(document_id, sequence as u32),
                text_hash: hash_text(&text),
                text,
                overlap_bytes: piece.overlap_bytes,
                token_count: piece.token_count,
                location: piece.location,
                embedding: None,
            }
        })
        .collect()
}

/// Inverse of chunking: concatenates each chunk minus its overlap prefix.
pub fn reconstruct_text(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationKind;

    fn fragment(text: &str, page: u32) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            location: Location::at(LocationKind::Page, page),
        }
    }

    fn config(target_tokens: usize, overlap_ratio: f64) -> ChunkingConfig {
        ChunkingConfig {
            target_tokens,
            overlap_ratio,
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn fragment_normalization_keeps_lines() {
        let input = "Title   \r\nBody line\u{a0}\r\n\r\n";
        assert_eq!(normalize_fragment_text(input), "Title\nBody line");
    }

    #[test]
    fn tokenizer_splits_words_and_punctuation() {
        let text = "Bore ⌀10 ±0.002, Rev-D";
        let tokens: Vec<&str> = token_texts(text).collect();
        assert_eq!(
            tokens,
            vec!["Bore", "⌀", "10", "±", "0", ".", "002", ",", "Rev", "-", "D"]
        );
    }

    #[test]
    fn chunks_cover_text_without_gaps() -> Result<(), IngestError> {
        let body = (0..137)
            .map(|index| format!("word{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let fragments = vec![
            fragment(&format!("  {body}"), 1),
            fragment("second page, with punctuation!", 2),
            fragment("third   page\n\nends here  ", 3),
        ];

        for (target, ratio) in [(10, 0.0), (10, 0.3), (7, 0.5), (1, 0.0), (500, 0.1)] {
            let chunked = chunk_fragments(&fragments, &config(target, ratio))?;
            let chunks = build_chunks("doc", &chunked);
            assert_eq!(reconstruct_text(&chunks), chunked.text);
            assert!(chunks.iter().all(|chunk| chunk.token_count <= target));
        }
        Ok(())
    }

    #[test]
    fn overlap_repeats_tail_tokens_of_previous_chunk() -> Result<(), IngestError> {
        let text = (1..=25).map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        let chunked = chunk_fragments(&[fragment(&text, 1)], &config(10, 0.2))?;
        let chunks = build_chunks("doc", &chunked);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].overlap_bytes, 0);
        assert!(chunks[1].text.starts_with("9 10 11"));
        assert_eq!(&chunks[1].text[..chunks[1].overlap_bytes], "9 10 ");
        assert_eq!(chunks[2].token_count, 9);
        assert!(chunks[2].text.ends_with("25"));
        Ok(())
    }

    #[test]
    fn chunk_location_spans_contributing_fragments() -> Result<(), IngestError> {
        let fragments = vec![
            fragment("alpha beta gamma", 4),
            fragment("delta epsilon", 5),
            fragment("zeta", 6),
        ];
        let chunked = chunk_fragments(&fragments, &config(4, 0.0))?;
        let chunks = build_chunks("doc", &chunked);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].location.start, 4);
        assert_eq!(chunks[0].location.end, 5);
        assert_eq!(chunks[1].location.start, 5);
        assert_eq!(chunks[1].location.end, 6);
        assert_eq!(chunks[1].id, ChunkId::new("doc", 1));
        Ok(())
    }

    #[test]
    fn blank_text_produces_no_chunks() -> Result<(), IngestError> {
        let chunked = chunk_fragments(&[fragment("   ", 1)], &ChunkingConfig::default())?;
        assert!(chunked.pieces.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let fragments = [fragment("text", 1)];
        assert!(matches!(
            chunk_fragments(&fragments, &config(10, 1.0)),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            chunk_fragments(&fragments, &config(0, 0.1)),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
