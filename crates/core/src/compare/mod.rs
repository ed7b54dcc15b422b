//! Spec/Rev Guard: cross-document revision and tolerance consistency checks.
//!
//! Each document's text is scanned for revision tags and tolerance
//! expressions ([`patterns`]), fields are aligned across documents by fuzzy
//! context similarity with matching numbers and units ([`align`]), and every
//! aligned group whose values disagree becomes a [`Mismatch`]. Alignment is heuristic; its threshold is
//! configurable and its decisions should be read as advisory.

pub mod align;
pub mod patterns;

pub use align::{align_fields, context_similarity, FieldGroup, GroupMember};
pub use patterns::{normalize_context, normalize_revision, FieldExtractor};

use crate::error::{CompareError, ConfigError};
use crate::models::{Location, StoredDocument, TextFragment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompareConfig {
    /// Minimum context similarity (0..=1) for two fields to align.
    pub alignment_threshold: f64,
    /// Tolerance values differing by no more than this are equal.
    pub tolerance_epsilon: f64,
    /// Words of preceding text kept as a field's context.
    pub context_words: usize,
    /// Upper bound for the `tolerance: <value>` keyword form.
    pub max_keyword_tolerance: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            alignment_threshold: 0.75,
            tolerance_epsilon: 0.0,
            context_words: 6,
            max_keyword_tolerance: 1.0,
        }
    }
}

impl CompareConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alignment_threshold) {
            return Err(ConfigError::Invalid(format!(
                "compare.alignment_threshold must be within [0, 1], got {}",
                self.alignment_threshold
            )));
        }
        if !self.tolerance_epsilon.is_finite() || self.tolerance_epsilon < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "compare.tolerance_epsilon must be a non-negative number, got {}",
                self.tolerance_epsilon
            )));
        }
        if self.context_words == 0 {
            return Err(ConfigError::Invalid(
                "compare.context_words must be greater than 0".to_string(),
            ));
        }
        if !self.max_keyword_tolerance.is_finite() || self.max_keyword_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "compare.max_keyword_tolerance must be positive, got {}",
                self.max_keyword_tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Revision,
    Tolerance,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Revision => write!(f, "Revision tag"),
            FieldKind::Tolerance => write!(f, "Tolerance"),
        }
    }
}

/// A value pulled from one document together with the text around it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonField {
    pub kind: FieldKind,
    pub context: String,
    pub normalized_context: String,
    /// Revision code after normalization, or the tolerance as written.
    pub value: String,
    pub numeric_value: Option<f64>,
    pub unit: Option<String>,
    pub raw_match_text: String,
    pub location: Location,
    /// 1-based line within the fragment at `location`.
    pub line: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MismatchKind {
    RevisionMismatch,
    ToleranceMismatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentValue {
    pub document_id: String,
    pub filename: String,
    pub value: String,
    pub raw_match_text: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub context: String,
    pub location: Location,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mismatch {
    pub id: String,
    pub kind: MismatchKind,
    /// Human readable field description, e.g. "Revision tag (Drawing 100)".
    pub field: String,
    /// Normalized context the group was aligned on.
    pub context: String,
    pub values_by_document: Vec<DocumentValue>,
    pub severity: Severity,
    /// Spread between the largest and smallest tolerance.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentFieldSummary {
    pub document_id: String,
    pub filename: String,
    pub revision_fields: usize,
    pub tolerance_fields: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub documents: Vec<DocumentFieldSummary>,
    /// Field groups with members from at least two documents.
    pub aligned_groups: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatch(&self, mismatch_id: &str) -> Option<&Mismatch> {
        self.mismatches.iter().find(|mismatch| mismatch.id == mismatch_id)
    }
}

/// The comparator's view of one document: its id, name and located text.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparedDocument {
    pub document_id: String,
    pub filename: String,
    pub fragments: Vec<TextFragment>,
}

impl From<&StoredDocument> for ComparedDocument {
    fn from(stored: &StoredDocument) -> Self {
        Self {
            document_id: stored.document.id.clone(),
            filename: stored.document.filename.clone(),
            fragments: stored.text_fragments(),
        }
    }
}

pub struct Comparator {
    config: CompareConfig,
    extractor: FieldExtractor,
}

impl Comparator {
    pub fn new(config: CompareConfig) -> Result<Self, CompareError> {
        let extractor = FieldExtractor::new(&config)?;
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    pub fn extract_fields(&self, document: &ComparedDocument) -> Vec<ComparisonField> {
        self.extractor.extract(&document.fragments)
    }

    /// Compares 2-3 documents.
    ///
    /// Returns [`CompareError::NoComparableFields`] when no field could be
    /// aligned across two documents, and an `Ok` report with an empty
    /// mismatch list when everything that aligned agrees.
    pub fn compare(&self, documents: &[ComparedDocument]) -> Result<ComparisonReport, CompareError> {
        if !(2..=3).contains(&documents.len()) {
            return Err(CompareError::DocumentCount(documents.len()));
        }
        let mut seen = HashSet::new();
        for document in documents {
            if !seen.insert(document.document_id.as_str()) {
                return Err(CompareError::DuplicateDocument(document.document_id.clone()));
            }
        }

        let fields: Vec<Vec<ComparisonField>> = documents
            .iter()
            .map(|document| self.extract_fields(document))
            .collect();
        let groups = align_fields(&fields, self.config.alignment_threshold);
        let aligned: Vec<&FieldGroup> = groups.iter().filter(|group| group.spans_documents()).collect();

        debug!(
            documents = documents.len(),
            fields = fields.iter().map(Vec::len).sum::<usize>(),
            groups = groups.len(),
            aligned = aligned.len(),
            "aligned comparison fields"
        );

        if aligned.is_empty() {
            return Err(CompareError::NoComparableFields {
                documents: documents
                    .iter()
                    .map(|document| document.filename.clone())
                    .collect(),
            });
        }

        let mut mismatches: Vec<Mismatch> = aligned
            .iter()
            .filter_map(|group| self.detect(group, documents, &fields))
            .collect();
        mismatches.sort_by_key(|mismatch| mismatch.kind);

        let summaries = documents
            .iter()
            .zip(&fields)
            .map(|(document, fields)| DocumentFieldSummary {
                document_id: document.document_id.clone(),
                filename: document.filename.clone(),
                revision_fields: fields
                    .iter()
                    .filter(|field| field.kind == FieldKind::Revision)
                    .count(),
                tolerance_fields: fields
                    .iter()
                    .filter(|field| field.kind == FieldKind::Tolerance)
                    .count(),
            })
            .collect();

        Ok(ComparisonReport {
            report_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            documents: summaries,
            aligned_groups: aligned.len(),
            mismatches,
        })
    }

    fn detect(
        &self,
        group: &FieldGroup,
        documents: &[ComparedDocument],
        fields: &[Vec<ComparisonField>],
    ) -> Option<Mismatch> {
        let members: Vec<(&ComparedDocument, &ComparisonField)> = group
            .members
            .iter()
            .map(|member| (&documents[member.document], &fields[member.document][member.field]))
            .collect();

        let (kind, severity, delta) = match group.kind {
            FieldKind::Revision => {
                let first = &members[0].1.value;
                if members.iter().all(|(_, field)| &field.value == first) {
                    return None;
                }
                (MismatchKind::RevisionMismatch, Severity::High, None)
            }
            FieldKind::Tolerance => {
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|(_, field)| field.numeric_value)
                    .collect();
                let max = values.iter().copied().fold(f64::MIN, f64::max);
                let min = values.iter().copied().fold(f64::MAX, f64::min);
                let delta = max - min;
                if values.len() < 2 || delta <= self.config.tolerance_epsilon {
                    return None;
                }
                (MismatchKind::ToleranceMismatch, tolerance_severity(delta, min, max), Some(delta))
            }
        };

        let values_by_document: Vec<DocumentValue> = members
            .iter()
            .map(|(document, field)| DocumentValue {
                document_id: document.document_id.clone(),
                filename: document.filename.clone(),
                value: field.value.clone(),
                raw_match_text: field.raw_match_text.clone(),
                unit: field.unit.clone(),
                context: field.context.clone(),
                location: field.location,
                line: field.line,
            })
            .collect();

        let label = &members[0].1.context;
        let field = if label.is_empty() {
            group.kind.to_string()
        } else {
            format!("{} ({label})", group.kind)
        };

        Some(Mismatch {
            id: mismatch_id(kind, &group.context, &values_by_document),
            kind,
            field,
            context: group.context.clone(),
            values_by_document,
            severity,
            delta,
        })
    }
}

fn tolerance_severity(delta: f64, min: f64, max: f64) -> Severity {
    let magnitude = min.abs().max(max.abs());
    if magnitude == 0.0 {
        return Severity::High;
    }
    let relative = delta / magnitude;
    if relative >= 0.5 {
        Severity::High
    } else if relative >= 0.1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn mismatch_id(kind: MismatchKind, context: &str, values: &[DocumentValue]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{kind:?}").as_bytes());
    hasher.update([0]);
    hasher.update(context.as_bytes());
    for value in values {
        hasher.update([0]);
        hasher.update(value.document_id.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
