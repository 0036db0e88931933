use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::notify::message::MessageStyle;
use crate::notify::sink::Audience;
use crate::snapshot::normalize::ValueParser;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub aliases: AliasesConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub message: MessageStyle,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasesConfig {
    /// Path to the discipline-name replacement table. Empty means no
    /// table; unmapped names always pass through unchanged.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// The source locale writes `9,5`; turn this off for sources that
    /// already use dot decimals.
    #[serde(default = "default_true")]
    pub decimal_comma: bool,
    #[serde(default = "default_pending_markers")]
    pub pending_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Master switch. Off means delivery is explicitly skipped and a
    /// cycle may still commit its snapshot.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default = "default_summary_audience")]
    pub summary: AudienceConfig,
    #[serde(default = "default_detail_audience")]
    pub detail: AudienceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When a mandatory audience fails to receive its message the cycle
    /// fails without committing, so the same changes are re-sent next
    /// run.
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub telegram_chat_id: String,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/gradewatch/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_cache_path(&self) -> PathBuf {
        expand_tilde(&self.storage.cache_path)
    }

    pub fn alias_path(&self) -> Option<PathBuf> {
        let trimmed = self.aliases.path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(expand_tilde(trimmed))
        }
    }

    pub fn value_parser(&self) -> ValueParser {
        ValueParser::new(
            self.parsing.decimal_comma,
            self.parsing.pending_markers.clone(),
        )
    }

    pub fn audience(&self, audience: Audience) -> &AudienceConfig {
        match audience {
            Audience::Summary => &self.notify.summary,
            Audience::Detail => &self.notify.detail,
        }
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
cache_path = "~/.local/share/gradewatch/grades_cache.json"

[aliases]
# JSON object mapping raw discipline names to canonical ones.
path = ""

[parsing]
decimal_comma = true
pending_markers = ["--"]

[message]
emphasis = "*"
heading = "New grades posted:"

[notify]
enabled = true
stdout = true

[notify.telegram]
# Falls back to the TELEGRAM_BOT_TOKEN environment variable when empty.
bot_token = ""
parse_mode = "Markdown"

[notify.summary]
enabled = true
mandatory = false
telegram_chat_id = ""

[notify.detail]
enabled = true
mandatory = true
telegram_chat_id = ""
"#;
        template.to_string()
    }
}

impl TelegramConfig {
    /// Token from config, or the environment when the config leaves it
    /// empty so the secret can stay out of the file.
    pub fn resolved_bot_token(&self) -> Option<String> {
        let from_config = self.bot_token.trim();
        if !from_config.is_empty() {
            return Some(from_config.to_string());
        }
        std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            decimal_comma: true,
            pending_markers: default_pending_markers(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout: true,
            telegram: TelegramConfig::default(),
            summary: default_summary_audience(),
            detail: default_detail_audience(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            parse_mode: default_parse_mode(),
        }
    }
}

fn default_cache_path() -> String {
    "~/.local/share/gradewatch/grades_cache.json".to_string()
}

fn default_pending_markers() -> Vec<String> {
    vec!["--".to_string()]
}

fn default_parse_mode() -> String {
    "Markdown".to_string()
}

fn default_summary_audience() -> AudienceConfig {
    AudienceConfig {
        enabled: true,
        mandatory: false,
        telegram_chat_id: String::new(),
    }
}

fn default_detail_audience() -> AudienceConfig {
    AudienceConfig {
        enabled: true,
        mandatory: true,
        telegram_chat_id: String::new(),
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back_into_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).unwrap();
        assert!(parsed.notify.enabled);
        assert!(parsed.parsing.decimal_comma);
        assert_eq!(parsed.message.emphasis, "*");
        assert!(!parsed.notify.summary.mandatory);
        assert!(parsed.notify.detail.mandatory);
    }

    #[test]
    fn empty_alias_path_means_no_table() {
        let config = Config::default();
        assert!(config.alias_path().is_none());
    }
}
