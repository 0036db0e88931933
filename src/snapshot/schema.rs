use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed grade cell. The three states must stay distinguishable:
/// a published number, a placeholder for a grade the instructor has not
/// released yet, and an empty cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GradeValue {
    Score(f64),
    Pending,
    Absent,
}

impl GradeValue {
    pub fn as_score(&self) -> Option<f64> {
        match self {
            GradeValue::Score(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_score(&self) -> bool {
        matches!(self, GradeValue::Score(_))
    }
}

impl Display for GradeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GradeValue::Score(v) => write!(f, "{}", format_score(*v)),
            GradeValue::Pending => write!(f, "--"),
            GradeValue::Absent => write!(f, ""),
        }
    }
}

/// Grades are published at fixed precision; integral values keep one
/// decimal place so `10` renders as `10.0`.
pub fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Identity of a grade cell: term, canonical discipline name, class
/// section when the discipline has more than one offering, and the
/// assessment label. Extraction timestamps are never part of identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub period: String,
    pub discipline: String,
    pub section: Option<String>,
    pub assessment: String,
}

impl RecordKey {
    /// Stable string form used as the cache document's map key. Fields are
    /// tab-joined; the extractor strips all whitespace runs from cell text,
    /// so a tab can never appear inside a field.
    pub fn storage_key(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.period,
            self.discipline,
            self.section.as_deref().unwrap_or(""),
            self.assessment
        )
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.section {
            Some(section) => write!(
                f,
                "{} / {} ({}) / {}",
                self.period, self.discipline, section, self.assessment
            ),
            None => write!(f, "{} / {} / {}", self.period, self.discipline, self.assessment),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeRecord {
    pub period: String,
    pub discipline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub assessment: String,
    pub value: GradeValue,
    pub observed_at: DateTime<Utc>,
}

impl GradeRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            period: self.period.clone(),
            discipline: self.discipline.clone(),
            section: self.section.clone(),
            assessment: self.assessment.clone(),
        }
    }
}

/// One raw row handed over by the extraction collaborator, before alias
/// resolution and value parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub period: String,
    pub discipline: String,
    #[serde(default)]
    pub section: Option<String>,
    pub assessment: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same key, same value. Collapsed silently.
    Duplicate,
    /// Same key, different value. The first record wins; the caller is
    /// expected to surface the conflict.
    Conflict,
}

/// The full set of grade records from one extraction run, uniquely keyed
/// and preserving first-seen insertion order. First-seen order is part of
/// the contract: the differ and the formatter derive their output order
/// from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: BTreeMap<RecordKey, GradeRecord>,
    order: Vec<RecordKey>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a snapshot from already-validated records, e.g. a cache
    /// load. Iteration order follows the input order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = GradeRecord>,
    {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    pub fn insert(&mut self, record: GradeRecord) -> InsertOutcome {
        let key = record.key();
        match self.records.get(&key) {
            Some(existing) if existing.value == record.value => InsertOutcome::Duplicate,
            Some(_) => InsertOutcome::Conflict,
            None => {
                self.order.push(key.clone());
                self.records.insert(key, record);
                InsertOutcome::Inserted
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&GradeRecord> {
        self.records.get(key)
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &GradeRecord> {
        self.order.iter().filter_map(|key| self.records.get(key))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(discipline: &str, assessment: &str, value: GradeValue) -> GradeRecord {
        GradeRecord {
            period: "2024.2".to_string(),
            discipline: discipline.to_string(),
            section: None,
            assessment: assessment.to_string(),
            value,
            observed_at: DateTime::parse_from_rfc3339("2024-11-05T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn insert_preserves_first_seen_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(record("Zoology", "Unid. 1", GradeValue::Score(7.0)));
        snapshot.insert(record("Algebra", "Unid. 1", GradeValue::Score(8.0)));

        let order: Vec<_> = snapshot.iter().map(|r| r.discipline.as_str()).collect();
        assert_eq!(order, vec!["Zoology", "Algebra"]);
    }

    #[test]
    fn duplicate_key_with_same_value_collapses() {
        let mut snapshot = Snapshot::new();
        assert_eq!(
            snapshot.insert(record("Biology", "Unid. 1", GradeValue::Score(9.5))),
            InsertOutcome::Inserted
        );
        assert_eq!(
            snapshot.insert(record("Biology", "Unid. 1", GradeValue::Score(9.5))),
            InsertOutcome::Duplicate
        );
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn duplicate_key_with_different_value_keeps_first() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(record("Biology", "Unid. 1", GradeValue::Score(9.5)));
        assert_eq!(
            snapshot.insert(record("Biology", "Unid. 1", GradeValue::Score(4.0))),
            InsertOutcome::Conflict
        );
        let key = record("Biology", "Unid. 1", GradeValue::Pending).key();
        assert_eq!(snapshot.get(&key).unwrap().value, GradeValue::Score(9.5));
    }

    #[test]
    fn score_display_keeps_fixed_precision() {
        assert_eq!(GradeValue::Score(10.0).to_string(), "10.0");
        assert_eq!(GradeValue::Score(9.5).to_string(), "9.5");
        assert_eq!(GradeValue::Pending.to_string(), "--");
    }
}
