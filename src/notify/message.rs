use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::snapshot::differ::{Change, ChangeSet};
use crate::snapshot::schema::format_score;

/// Markup convention for the rendered messages. The emphasis delimiter
/// is configuration, not a per-call-site literal, so a delivery channel
/// with different markup swaps it without touching the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStyle {
    #[serde(default = "default_emphasis")]
    pub emphasis: String,
    #[serde(default = "default_heading")]
    pub heading: String,
}

impl Default for MessageStyle {
    fn default() -> Self {
        Self {
            emphasis: default_emphasis(),
            heading: default_heading(),
        }
    }
}

impl MessageStyle {
    fn emphasized(&self, text: &str) -> String {
        format!("{}{}{}", self.emphasis, text, self.emphasis)
    }
}

fn default_emphasis() -> String {
    "*".to_string()
}

fn default_heading() -> String {
    "New grades posted:".to_string()
}

/// The two audience-specific payloads for one change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Discipline names only, for broadcast delivery.
    pub summary: String,
    /// Discipline names plus the numeric values that changed this cycle.
    pub detail: String,
}

/// Renders a change set into both payloads. `None` means there is
/// nothing to say; callers must not deliver an empty message.
pub fn render(set: &ChangeSet, style: &MessageStyle) -> Option<Notification> {
    if set.is_empty() {
        return None;
    }

    let heading = style.emphasized(&style.heading);
    let mut summary = format!("{heading}\n\n");
    let mut detail = format!("{heading}\n\n");

    for (position, (discipline, changes)) in set.by_discipline().into_iter().enumerate() {
        let label = discipline_label(discipline, &changes);
        summary.push_str(&format!("{}. {}\n", position + 1, discipline));

        let values: Vec<String> = changes
            .iter()
            .filter_map(|change| change.current.as_score())
            .map(|score| style.emphasized(&format_score(score)))
            .collect();
        if values.is_empty() {
            detail.push_str(&format!("{}. {}\n", position + 1, label));
        } else {
            detail.push_str(&format!("{}. {}: {}\n", position + 1, label, values.join(", ")));
        }
    }

    Some(Notification { summary, detail })
}

/// Appends the class section to the detail label when all of the
/// discipline's changes come from one explicit section; with several
/// sections in play the plain name is less misleading.
fn discipline_label(discipline: &str, changes: &[&Change]) -> String {
    let sections: BTreeSet<&str> = changes
        .iter()
        .filter_map(|change| change.key.section.as_deref())
        .collect();
    match (sections.len(), changes.iter().all(|c| c.key.section.is_some())) {
        (1, true) => {
            let section = sections.into_iter().next().unwrap_or_default();
            format!("{discipline} ({section})")
        }
        _ => discipline.to_string(),
    }
}
