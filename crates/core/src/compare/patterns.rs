//! Pattern families that pull revision tags and tolerance expressions out of
//! document text, one line at a time.

use super::{CompareConfig, ComparisonField, FieldKind};
use crate::models::TextFragment;
use regex::{Captures, Regex};

const REVISION_PATTERN: &str = r"\b(?i:rev(?:ision)?)(?:\.\s*|\s*[:#]\s*|\s+)(?P<code>[A-Z]{1,2}|\d{1,3}(?:\.\d{1,2})?)\b";
const SIGNED_TOLERANCE_PATTERN: &str = r"(?:±|\+\s*/\s*-|\+-)\s*(?P<value>\d+(?:\.\d+)?|\.\d+)(?:\s*(?P<unit>(?:mm|µm|μm|um|in|deg)\b|°))?";
const KEYWORD_TOLERANCE_PATTERN: &str = r"(?i)\btolerances?\s*[:=]?\s*(?P<value>\d+(?:\.\d+)?|\.\d+)(?:\s*(?P<unit>(?:mm|µm|μm|um|in|deg)\b|°))?";

pub struct FieldExtractor {
    revision: Regex,
    signed_tolerance: Regex,
    keyword_tolerance: Regex,
    context_words: usize,
    max_keyword_tolerance: f64,
}

impl FieldExtractor {
    pub fn new(config: &CompareConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            revision: Regex::new(REVISION_PATTERN)?,
            signed_tolerance: Regex::new(SIGNED_TOLERANCE_PATTERN)?,
            keyword_tolerance: Regex::new(KEYWORD_TOLERANCE_PATTERN)?,
            context_words: config.context_words.max(1),
            max_keyword_tolerance: config.max_keyword_tolerance,
        })
    }

    /// Fields in reading order. Repeats of the same field (same kind, context,
    /// value and unit) keep only their first occurrence; fields without any
    /// context are never merged.
    ///
    /// A field with nothing labelling it on its own line takes its context
    /// from the non-blank line before it, which may belong to the previous
    /// fragment. Lines holding fields of their own never label the next one.
    pub fn extract(&self, fragments: &[TextFragment]) -> Vec<ComparisonField> {
        let mut fields: Vec<ComparisonField> = Vec::new();
        let mut previous_line = "";

        for fragment in fragments {
            for (line_index, line) in fragment.text.lines().enumerate() {
                let line_number = line_index as u32 + 1;
                let mut found = self.revisions(line, previous_line, line_number, fragment);
                found.extend(self.tolerances(line, previous_line, line_number, fragment));
                found.sort_by_key(|(offset, _)| *offset);
                let carries_fields = !found.is_empty();

                for (_, field) in found {
                    let repeated = !field.normalized_context.is_empty()
                        && fields.iter().any(|seen| {
                            seen.kind == field.kind
                                && seen.value == field.value
                                && seen.unit == field.unit
                                && seen.normalized_context == field.normalized_context
                        });
                    if !repeated {
                        fields.push(field);
                    }
                }

                if carries_fields {
                    previous_line = "";
                } else if !line.trim().is_empty() {
                    previous_line = line;
                }
            }
        }

        fields
    }

    fn revisions(
        &self,
        line: &str,
        previous_line: &str,
        line_number: u32,
        fragment: &TextFragment,
    ) -> Vec<(usize, ComparisonField)> {
        let mut found = Vec::new();
        let mut context_start = 0;

        for captures in self.revision.captures_iter(line) {
            let (Some(whole), Some(code)) = (captures.get(0), captures.name("code")) else {
                continue;
            };
            let mut context = trailing_words(&line[context_start..whole.start()], self.context_words);
            if context.is_empty() && context_start == 0 {
                context = trailing_words(previous_line, self.context_words);
            }
            context_start = whole.end();

            found.push((
                whole.start(),
                ComparisonField {
                    kind: FieldKind::Revision,
                    normalized_context: normalize_context(&context),
                    context,
                    value: normalize_revision(code.as_str()),
                    numeric_value: None,
                    unit: None,
                    raw_match_text: whole.as_str().to_string(),
                    location: fragment.location,
                    line: line_number,
                },
            ));
        }

        found
    }

    fn tolerances(
        &self,
        line: &str,
        previous_line: &str,
        line_number: u32,
        fragment: &TextFragment,
    ) -> Vec<(usize, ComparisonField)> {
        let mut matches: Vec<(Captures<'_>, bool)> = self
            .signed_tolerance
            .captures_iter(line)
            .map(|captures| (captures, false))
            .collect();
        matches.extend(
            self.keyword_tolerance
                .captures_iter(line)
                .map(|captures| (captures, true)),
        );
        matches.sort_by_key(|(captures, _)| captures.get(0).map_or(0, |whole| whole.start()));

        let mut found = Vec::new();
        let mut context_start = 0;

        for (captures, keyword_form) in matches {
            let (Some(whole), Some(value)) = (captures.get(0), captures.name("value")) else {
                continue;
            };
            let Some(numeric) = parse_decimal(value.as_str()) else {
                continue;
            };
            if keyword_form && numeric > self.max_keyword_tolerance {
                continue;
            }

            // The keyword form's label sits inside the match itself.
            let label_end = if keyword_form { value.start() } else { whole.start() };
            let mut context = trailing_words(&line[context_start.min(label_end)..label_end], self.context_words);
            if context.is_empty() && context_start == 0 {
                context = trailing_words(previous_line, self.context_words);
            }
            context_start = whole.end();

            let unit = captures.name("unit").map(|unit| normalize_unit(unit.as_str()));
            found.push((
                whole.start(),
                ComparisonField {
                    kind: FieldKind::Tolerance,
                    normalized_context: normalize_context(&context),
                    context,
                    value: value.as_str().to_string(),
                    numeric_value: Some(numeric),
                    unit,
                    raw_match_text: whole.as_str().trim_end().to_string(),
                    location: fragment.location,
                    line: line_number,
                },
            ));
        }

        found
    }
}

fn trailing_words(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(count);
    words[start..]
        .join(" ")
        .trim_end_matches([':', '=', ',', ';', '-'])
        .trim()
        .to_string()
}

/// Lower-case, unify diameter glyphs, and collapse punctuation to spaces.
pub fn normalize_context(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|ch| match ch {
            '⌀' | 'Ø' | 'ø' => '⌀',
            ch if ch.is_alphanumeric() => ch,
            _ => ' ',
        })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical spelling of a tolerance unit: micrometres as `µm`, degrees as `°`.
pub fn normalize_unit(unit: &str) -> String {
    match unit {
        "µm" | "μm" | "um" => "µm".to_string(),
        "deg" | "°" => "°".to_string(),
        other => other.to_string(),
    }
}

pub fn normalize_revision(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    if !code.is_empty() && code.chars().all(|ch| ch.is_ascii_digit()) {
        let trimmed = code.trim_start_matches('0');
        if trimmed.is_empty() {
            return "0".to_string();
        }
        return trimmed.to_string();
    }
    code
}

fn parse_decimal(value: &str) -> Option<f64> {
    value
        .replace(',', "")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}
