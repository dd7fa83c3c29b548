//! Deciding whether an entry announces a relevant index change.
//!
//! A [`Filter`] is a pure predicate compiled once from configuration. All
//! matching is case-insensitive; an entry matches when any pattern matches
//! any of the configured fields.

use regex::{RegexSet, RegexSetBuilder};

use crate::error::ConfigError;
use crate::source::Entry;

/// Change verbs matched by the layered mode when none are configured.
pub const DEFAULT_CHANGE_TERMS: &[&str] = &[
    r"replac",
    r"constituen",
    r"addition",
    r"deletion",
    r"set to join",
    r"rebalanc",
];

/// Index names matched by the layered mode when none are configured.
pub const DEFAULT_INDEX_TERMS: &[&str] = &[
    r"S&P 500",
    r"S&P MidCap 400",
    r"S&P SmallCap 600",
    r"Dow Jones Industrial Average",
];

/// Entry field a filter looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Title,
    Summary,
    Content,
}

impl FilterField {
    fn extract(self, entry: &Entry) -> Option<&str> {
        match self {
            FilterField::Title => Some(entry.title.as_str()),
            FilterField::Summary => entry.summary.as_deref(),
            FilterField::Content => entry.content.as_deref(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "title" => Some(FilterField::Title),
            "summary" | "description" => Some(FilterField::Summary),
            "content" => Some(FilterField::Content),
            _ => None,
        }
    }
}

/// Which pattern set to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMode {
    /// A single literal keyword, matched as a substring.
    Keyword(String),
    /// Regular expressions: general change terms plus index-name terms.
    Layered {
        change_terms: Vec<String>,
        index_terms: Vec<String>,
    },
}

impl FilterMode {
    /// Layered mode with the built-in term lists.
    pub fn layered_defaults() -> Self {
        FilterMode::Layered {
            change_terms: DEFAULT_CHANGE_TERMS.iter().map(|s| s.to_string()).collect(),
            index_terms: DEFAULT_INDEX_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Filter configuration as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub mode: FilterMode,
    pub fields: Vec<FilterField>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Keyword("replace".into()),
            fields: vec![FilterField::Title, FilterField::Summary],
        }
    }
}

/// Compiled entry predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    patterns: RegexSet,
    fields: Vec<FilterField>,
}

impl Filter {
    pub fn new(config: &FilterConfig) -> Result<Self, ConfigError> {
        let patterns: Vec<String> = match &config.mode {
            FilterMode::Keyword(keyword) => {
                let keyword = keyword.trim();
                if keyword.is_empty() {
                    return Err(ConfigError::Missing("FILTER_KEYWORD"));
                }
                vec![regex::escape(keyword)]
            }
            FilterMode::Layered {
                change_terms,
                index_terms,
            } => change_terms
                .iter()
                .chain(index_terms)
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        };
        if patterns.is_empty() {
            return Err(ConfigError::Missing("FILTER_CHANGE_TERMS"));
        }
        if config.fields.is_empty() {
            return Err(ConfigError::Missing("FILTER_FIELDS"));
        }

        let patterns = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            patterns,
            fields: config.fields.clone(),
        })
    }

    /// Whether the entry represents a relevant change.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.fields
            .iter()
            .filter_map(|field| field.extract(entry))
            .any(|text| self.patterns.is_match(text))
    }
}
