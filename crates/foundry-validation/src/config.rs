use serde::{Deserialize, Serialize};

/// Patterns that mark placeholder code or vague language.
pub fn default_forbidden_patterns() -> Vec<String> {
    vec![
        r"\bTODO\b".to_string(),
        r"\bFIXME\b".to_string(),
        r"unimplemented!".to_string(),
        r"todo!\s*\(".to_string(),
        r#"panic!\s*\(\s*"not implemented"#.to_string(),
        "NotImplementedError".to_string(),
        r"(?i)\b(somehow|maybe|possibly|perhaps)\b".to_string(),
    ]
}

fn default_min_output_chars() -> usize {
    1
}

fn default_min_keyword_len() -> usize {
    4
}

/// Validation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Regexes that fail the quality stage when found in produced content.
    #[serde(default = "default_forbidden_patterns")]
    pub forbidden_patterns: Vec<String>,
    /// Minimum length of the produced text.
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,
    /// Words shorter than this are ignored when matching acceptance criteria.
    #[serde(default = "default_min_keyword_len")]
    pub min_keyword_len: usize,
    /// Run the acceptance-criteria stage.
    #[serde(default = "default_true")]
    pub check_acceptance: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            forbidden_patterns: default_forbidden_patterns(),
            min_output_chars: default_min_output_chars(),
            min_keyword_len: default_min_keyword_len(),
            check_acceptance: true,
        }
    }
}
