//! Fuzzy alignment of extracted fields into cross-document groups.

use super::{ComparisonField, FieldKind};
use std::collections::HashMap;

/// One field's membership in a group: which document and which field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMember {
    pub document: usize,
    pub field: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub kind: FieldKind,
    /// Normalized context of the group's founding field.
    pub context: String,
    /// First unit any member stated; later members must agree or omit it.
    pub unit: Option<String>,
    pub members: Vec<GroupMember>,
}

impl FieldGroup {
    pub fn spans_documents(&self) -> bool {
        self.members
            .iter()
            .any(|member| member.document != self.members[0].document)
    }

    fn accepts(&self, field: &ComparisonField) -> bool {
        field.kind == self.kind
            && match (&self.unit, &field.unit) {
                (Some(group_unit), Some(field_unit)) => group_unit == field_unit,
                _ => true,
            }
    }
}

/// Sørensen-Dice coefficient over character bigrams.
///
/// Numbers are part of what a context names: `bore ⌀10` and `bore ⌀12` are
/// different dimensions and score 0, however alike the wording. An empty
/// context labels nothing and scores 0 against everything, itself included.
pub fn context_similarity(left: &str, right: &str) -> f64 {
    if left.is_empty() || right.is_empty() || numbers(left) != numbers(right) {
        return 0.0;
    }
    if left == right {
        return 1.0;
    }
    let left_bigrams = bigrams(left);
    let right_bigrams = bigrams(right);

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for bigram in &left_bigrams {
        *counts.entry(*bigram).or_default() += 1;
    }
    let mut shared = 0usize;
    for bigram in &right_bigrams {
        if let Some(count) = counts.get_mut(bigram) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    (2 * shared) as f64 / (left_bigrams.len() + right_bigrams.len()) as f64
}

/// Digit runs in order, leading zeros dropped.
fn numbers(text: &str) -> Vec<&str> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| match run.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        })
        .collect()
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() == 1 {
        return vec![(chars[0], ' ')];
    }
    chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Groups fields across documents, taking documents in order.
///
/// The first document's fields each found a group. Every later document is
/// matched greedily one-to-one: candidate (group, field) pairs of the same
/// kind, with compatible units, at or above `threshold` are taken
/// best-first, ties broken by group then field position. A group receives
/// at most one field per document and unmatched fields found new groups.
pub fn align_fields(documents: &[Vec<ComparisonField>], threshold: f64) -> Vec<FieldGroup> {
    let mut groups: Vec<FieldGroup> = Vec::new();

    for (document, fields) in documents.iter().enumerate() {
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (group_index, group) in groups.iter().enumerate() {
            for (field_index, field) in fields.iter().enumerate() {
                if !group.accepts(field) {
                    continue;
                }
                let similarity = context_similarity(&group.context, &field.normalized_context);
                if similarity >= threshold {
                    candidates.push((similarity, group_index, field_index));
                }
            }
        }
        candidates.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then(left.1.cmp(&right.1))
                .then(left.2.cmp(&right.2))
        });

        let mut group_taken = vec![false; groups.len()];
        let mut field_taken = vec![false; fields.len()];
        for (_, group_index, field_index) in candidates {
            if group_taken[group_index] || field_taken[field_index] {
                continue;
            }
            group_taken[group_index] = true;
            field_taken[field_index] = true;
            let group = &mut groups[group_index];
            if group.unit.is_none() {
                group.unit = fields[field_index].unit.clone();
            }
            group.members.push(GroupMember {
                document,
                field: field_index,
            });
        }

        for (field_index, field) in fields.iter().enumerate() {
            if field_taken[field_index] {
                continue;
            }
            groups.push(FieldGroup {
                kind: field.kind,
                context: field.normalized_context.clone(),
                unit: field.unit.clone(),
                members: vec![GroupMember {
                    document,
                    field: field_index,
                }],
            });
        }
    }

    groups
}
