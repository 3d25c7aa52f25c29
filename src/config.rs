use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Conversion settings shared by the forward converter and the target parser.
///
/// Read-only once built; one instance can serve any number of threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link labels treated as "continue-style" jumps. The first one is what
    /// bare jumps are emitted with.
    pub continue_labels: Vec<String>,
    /// Passage holding the frontmatter state.
    pub init_passage: String,
    /// Passage holding content that precedes the first heading.
    pub prologue_passage: String,
    pub scene_tag: String,
    pub prologue_tag: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            continue_labels: vec!["Continue".to_string(), "Next".to_string()],
            init_passage: "StoryInit".to_string(),
            prologue_passage: "Start".to_string(),
            scene_tag: "scene".to_string(),
            prologue_tag: "prologue".to_string(),
        }
    }
}

impl Config {
    /// Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        if config.continue_labels.iter().all(|l| l.trim().is_empty()) {
            return Err(ConfigError::NoContinueLabels);
        }
        Ok(config)
    }

    pub fn continue_label(&self) -> &str {
        self.continue_labels
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or("Continue")
    }

    pub fn is_continue_label(&self, label: &str) -> bool {
        let label = label.trim();
        self.continue_labels
            .iter()
            .any(|l| l.trim().eq_ignore_ascii_case(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_synonyms() {
        let config = Config::default();
        assert_eq!(config.continue_label(), "Continue");
        assert!(config.is_continue_label("continue"));
        assert!(config.is_continue_label(" Next "));
        assert!(!config.is_continue_label("Fight"));
    }

    #[test]
    fn test_from_json_overrides() {
        let config = Config::from_json(r#"{"continue_labels": ["Weiter"]}"#).unwrap();
        assert_eq!(config.continue_label(), "Weiter");
        assert!(!config.is_continue_label("Continue"));
        assert_eq!(config.init_passage, "StoryInit");
    }

    #[test]
    fn test_from_json_rejects_empty_synonyms() {
        assert!(matches!(
            Config::from_json(r#"{"continue_labels": []}"#),
            Err(ConfigError::NoContinueLabels)
        ));
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
