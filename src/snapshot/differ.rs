use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::schema::{GradeValue, RecordKey, Snapshot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First key ever seen for this discipline.
    NewDiscipline,
    /// A new assessment appeared for a known discipline, or a grade was
    /// published where the cell was pending or empty before.
    NewGrade,
    /// Two published numeric values that differ.
    UpdatedGrade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub key: RecordKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<GradeValue>,
    pub current: GradeValue,
}

/// Ordered sequence of detected differences: disciplines in first-seen
/// order within the current snapshot, assessments in first-seen order
/// within each discipline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Discipline names, deduplicated, preserving change order.
    pub fn disciplines(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for change in &self.changes {
            let discipline = change.key.discipline.as_str();
            if seen.insert(discipline) {
                out.push(discipline);
            }
        }
        out
    }

    /// Changes grouped per discipline, preserving both the discipline
    /// order and the per-assessment order inside each group.
    pub fn by_discipline(&self) -> Vec<(&str, Vec<&Change>)> {
        let mut groups: Vec<(&str, Vec<&Change>)> = Vec::new();
        for change in &self.changes {
            let discipline = change.key.discipline.as_str();
            match groups.iter_mut().find(|(name, _)| *name == discipline) {
                Some((_, members)) => members.push(change),
                None => groups.push((discipline, vec![change])),
            }
        }
        groups
    }
}

/// Computes the differences between the last accepted snapshot and the
/// current one. Pure: identical inputs always produce an identical
/// change set.
///
/// Keys present only in `previous` are deliberately not reported. The
/// source system is authoritative and retraction is too unreliable to
/// detect from a scrape, so a temporarily missing section must not show
/// up as "removed".
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let known_disciplines: BTreeSet<&str> = previous
        .iter()
        .map(|record| record.discipline.as_str())
        .collect();

    let mut discipline_rank: BTreeMap<&str, usize> = BTreeMap::new();
    let mut ranked: Vec<(usize, Change)> = Vec::new();

    for record in current.iter() {
        let key = record.key();
        let change = match previous.get(&key) {
            None => {
                let kind = if known_disciplines.contains(record.discipline.as_str()) {
                    ChangeKind::NewGrade
                } else {
                    ChangeKind::NewDiscipline
                };
                Some(Change {
                    kind,
                    key,
                    previous: None,
                    current: record.value.clone(),
                })
            }
            Some(prior) => match (&prior.value, &record.value) {
                (GradeValue::Pending | GradeValue::Absent, GradeValue::Score(_)) => Some(Change {
                    kind: ChangeKind::NewGrade,
                    key,
                    previous: Some(prior.value.clone()),
                    current: record.value.clone(),
                }),
                (GradeValue::Score(old), GradeValue::Score(new)) if old != new => Some(Change {
                    kind: ChangeKind::UpdatedGrade,
                    key,
                    previous: Some(prior.value.clone()),
                    current: record.value.clone(),
                }),
                _ => None,
            },
        };

        if let Some(change) = change {
            let next_rank = discipline_rank.len();
            let rank = *discipline_rank
                .entry(record.discipline.as_str())
                .or_insert(next_rank);
            ranked.push((rank, change));
        }
    }

    // Stable by discipline rank, so per-assessment order inside each
    // discipline survives the grouping.
    ranked.sort_by_key(|(rank, _)| *rank);
    ChangeSet {
        changes: ranked.into_iter().map(|(_, change)| change).collect(),
    }
}
