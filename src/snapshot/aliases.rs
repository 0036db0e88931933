use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Replacement table collapsing cosmetic variants of a discipline name
/// (casing, abbreviations) into one canonical spelling. Unmapped names
/// pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads the table from a JSON object file mapping raw variant to
    /// canonical name. A missing file is an empty table, not an error; a
    /// file that exists but does not parse is.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "alias table not found, using no replacements");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading alias table: {}", path.display()))?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&data)
            .with_context(|| format!("failed parsing alias table: {}", path.display()))?;
        Ok(Self { entries })
    }

    pub fn resolve<'a>(&'a self, raw: &'a str) -> &'a str {
        self.entries.get(raw).map(String::as_str).unwrap_or(raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_variant() {
        let table = AliasTable::from_entries([("CALCULO DIF E INT I", "Calculus I")]);
        assert_eq!(table.resolve("CALCULO DIF E INT I"), "Calculus I");
    }

    #[test]
    fn unmapped_name_passes_through() {
        let table = AliasTable::from_entries([("X", "Y")]);
        assert_eq!(table.resolve("Linear Algebra"), "Linear Algebra");
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = AliasTable::load(&dir.path().join("nope.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(AliasTable::load(&path).is_err());
    }
}
