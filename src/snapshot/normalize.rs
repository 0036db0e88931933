use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::snapshot::aliases::AliasTable;
use crate::snapshot::schema::{GradeRecord, GradeValue, InsertOutcome, RawRow, RecordKey, Snapshot};

/// Per-row normalization failure. Collected and surfaced alongside the
/// snapshot; a bad row never aborts the rest of the run.
#[derive(Debug, Clone, Error)]
pub enum RowError {
    #[error("row {index}: unparseable grade value {value:?} for {key}")]
    UnparseableValue {
        index: usize,
        key: RecordKey,
        value: String,
    },
    #[error("row {index}: conflicting value for duplicate key {key}")]
    ConflictingDuplicate { index: usize, key: RecordKey },
}

/// Parses raw cell text into the score/pending/absent tri-state. The
/// source locale writes decimal commas, so `9,5` and `9.5` are the same
/// grade when comma handling is on.
#[derive(Debug, Clone)]
pub struct ValueParser {
    decimal_comma: bool,
    pending_markers: Vec<String>,
}

impl ValueParser {
    pub fn new(decimal_comma: bool, pending_markers: Vec<String>) -> Self {
        Self {
            decimal_comma,
            pending_markers,
        }
    }

    /// `None` means the text is neither numeric nor a recognized pending
    /// marker; the caller reports it per-row.
    pub fn parse(&self, raw: &str) -> Option<GradeValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(GradeValue::Absent);
        }
        if self.pending_markers.iter().any(|m| m == trimmed) {
            return Some(GradeValue::Pending);
        }
        let normalized = if self.decimal_comma {
            trimmed.replace(',', ".")
        } else {
            trimmed.to_string()
        };
        match normalized.parse::<f64>() {
            Ok(value) if value.is_finite() => Some(GradeValue::Score(value)),
            _ => None,
        }
    }
}

impl Default for ValueParser {
    fn default() -> Self {
        Self::new(true, vec!["--".to_string()])
    }
}

/// Turns the extraction collaborator's raw rows into the canonical
/// snapshot: alias resolution, value parsing, deterministic keying.
pub struct Normalizer<'a> {
    aliases: &'a AliasTable,
    parser: &'a ValueParser,
}

impl<'a> Normalizer<'a> {
    pub fn new(aliases: &'a AliasTable, parser: &'a ValueParser) -> Self {
        Self { aliases, parser }
    }

    /// The caller supplies one `observed_at` for the whole extraction run
    /// so that normalizing the same input twice yields an identical
    /// snapshot.
    pub fn normalize(
        &self,
        rows: &[RawRow],
        observed_at: DateTime<Utc>,
    ) -> (Snapshot, Vec<RowError>) {
        let mut snapshot = Snapshot::new();
        let mut errors = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            let discipline = self.aliases.resolve(row.discipline.trim()).to_string();
            let section = row
                .section
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let record = GradeRecord {
                period: row.period.trim().to_string(),
                discipline,
                section,
                assessment: row.assessment.trim().to_string(),
                value: GradeValue::Absent,
                observed_at,
            };

            let value = match self.parser.parse(&row.value) {
                Some(value) => value,
                None => {
                    let err = RowError::UnparseableValue {
                        index,
                        key: record.key(),
                        value: row.value.clone(),
                    };
                    warn!(%err, "dropping row");
                    errors.push(err);
                    continue;
                }
            };

            let record = GradeRecord { value, ..record };
            let key = record.key();
            match snapshot.insert(record) {
                InsertOutcome::Inserted => {}
                InsertOutcome::Duplicate => debug!(%key, "collapsed identical duplicate row"),
                InsertOutcome::Conflict => {
                    let err = RowError::ConflictingDuplicate { index, key };
                    warn!(%err, "source page yielded ambiguous rows");
                    errors.push(err);
                }
            }
        }

        (snapshot, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-11-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn row(discipline: &str, assessment: &str, value: &str) -> RawRow {
        RawRow {
            period: "2024.2".to_string(),
            discipline: discipline.to_string(),
            section: None,
            assessment: assessment.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn parses_decimal_comma_scores() {
        let parser = ValueParser::default();
        assert_eq!(parser.parse("9,5"), Some(GradeValue::Score(9.5)));
        assert_eq!(parser.parse("10.0"), Some(GradeValue::Score(10.0)));
        assert_eq!(parser.parse(" 7 "), Some(GradeValue::Score(7.0)));
    }

    #[test]
    fn recognizes_pending_and_absent() {
        let parser = ValueParser::default();
        assert_eq!(parser.parse("--"), Some(GradeValue::Pending));
        assert_eq!(parser.parse(""), Some(GradeValue::Absent));
        assert_eq!(parser.parse("   "), Some(GradeValue::Absent));
    }

    #[test]
    fn rejects_non_numeric_text() {
        let parser = ValueParser::default();
        assert_eq!(parser.parse("approved"), None);
        assert_eq!(parser.parse("9,5,1"), None);
    }

    #[test]
    fn bad_row_is_collected_without_blocking_the_rest() {
        let aliases = AliasTable::default();
        let parser = ValueParser::default();
        let normalizer = Normalizer::new(&aliases, &parser);

        let rows = vec![
            row("Biology", "Unid. 1", "9,5"),
            row("Biology", "Unid. 2", "garbage"),
            row("Calculus", "Unid. 1", "8,0"),
        ];
        let (snapshot, errors) = normalizer.normalize(&rows, fixed_now());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RowError::UnparseableValue { index: 1, .. }));
    }

    #[test]
    fn applies_alias_resolution() {
        let aliases = AliasTable::from_entries([("BIO0042 - GENERAL BIOLOGY", "Biology")]);
        let parser = ValueParser::default();
        let normalizer = Normalizer::new(&aliases, &parser);

        let rows = vec![row("BIO0042 - GENERAL BIOLOGY", "Unid. 1", "9,5")];
        let (snapshot, errors) = normalizer.normalize(&rows, fixed_now());

        assert!(errors.is_empty());
        assert_eq!(snapshot.iter().next().unwrap().discipline, "Biology");
    }

    #[test]
    fn conflicting_duplicate_surfaces_an_error_and_keeps_first() {
        let aliases = AliasTable::default();
        let parser = ValueParser::default();
        let normalizer = Normalizer::new(&aliases, &parser);

        let rows = vec![
            row("Biology", "Unid. 1", "9,5"),
            row("Biology", "Unid. 1", "4,0"),
        ];
        let (snapshot, errors) = normalizer.normalize(&rows, fixed_now());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            snapshot.iter().next().unwrap().value,
            GradeValue::Score(9.5)
        );
    }

    #[test]
    fn normalization_is_deterministic() {
        let aliases = AliasTable::default();
        let parser = ValueParser::default();
        let normalizer = Normalizer::new(&aliases, &parser);

        let rows = vec![
            row("Calculus", "Unid. 1", "8,0"),
            row("Biology", "Unid. 1", "9,5"),
        ];
        let now = fixed_now();
        let (first, _) = normalizer.normalize(&rows, now);
        let (second, _) = normalizer.normalize(&rows, now);
        assert_eq!(first, second);
    }
}
