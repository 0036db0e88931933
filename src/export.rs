use std::path::Path;

use anyhow::{Context, Result};

use crate::snapshot::schema::Snapshot;

/// Writes the snapshot as a flat CSV mirror of the grade table, one row
/// per assessment, in first-seen order.
pub fn write_csv(snapshot: &Snapshot, path: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed creating CSV file: {}", path.display()))?;
    writer.write_record([
        "period",
        "discipline",
        "section",
        "assessment",
        "value",
        "observed_at",
    ])?;
    for record in snapshot.iter() {
        writer.write_record([
            record.period.as_str(),
            record.discipline.as_str(),
            record.section.as_deref().unwrap_or(""),
            record.assessment.as_str(),
            &record.value.to_string(),
            &record.observed_at.to_rfc3339(),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("failed writing CSV file: {}", path.display()))?;
    Ok(snapshot.len())
}
