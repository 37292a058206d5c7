//! Species roster: the class order every per-class array follows.

use std::sync::Arc;

use serde::Serialize;

use crate::PipelineError;

/// Label language used for the base names.
pub const DEFAULT_LANGUAGE: &str = "en_us";

/// Languages label files are published for.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "af", "da", "en_us", "fr", "ja", "no", "ro", "sl", "tr", "ar", "de", "es", "hu", "ko", "pl",
    "ru", "sv", "uk", "cs", "en_uk", "fi", "it", "nl", "pt", "sk", "th", "zh",
];

/// Maps a language tag to a supported label language.
///
/// A supported code is returned as is. Anything else (`de-AT`, `pt_BR`,
/// `EN`) is matched on its base subtag against the supported list in order,
/// so `en` resolves to `en_us`. Unknown or missing tags fall back to
/// [`DEFAULT_LANGUAGE`].
pub fn resolve_language(tag: Option<&str>) -> &'static str {
    let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
        return DEFAULT_LANGUAGE;
    };
    let tag = tag.to_ascii_lowercase().replace('-', "_");
    if let Some(exact) = SUPPORTED_LANGUAGES.iter().find(|l| **l == tag) {
        return *exact;
    }
    let base = tag.split('_').next().unwrap_or_default();
    if base.is_empty() {
        return DEFAULT_LANGUAGE;
    }
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.starts_with(base))
        .copied()
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// One class of the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Species {
    /// Raw label line, usually `Scientific name_Common name`.
    pub label: String,
    /// Common name in the base language.
    pub name: String,
    /// Common name in the requested language.
    #[serde(rename = "nameI18n")]
    pub name_i18n: String,
}

/// Ordered, immutable list of species.
///
/// Cloning is cheap; all clones share the same entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    species: Arc<[Species]>,
}

/// Second `_`-separated field of a label line, or `None` when the line has
/// no such field or it is empty.
fn common_name(line: &str) -> Option<&str> {
    line.split('_').nth(1).filter(|s| !s.is_empty())
}

fn label_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

impl Roster {
    /// Builds a roster from base label text and optional localized text.
    ///
    /// Lines are matched by position. A localized line that is missing,
    /// empty or has no common-name field falls back to the base name.
    pub fn parse(base: &str, localized: Option<&str>) -> Result<Self, PipelineError> {
        let base_lines = label_lines(base);
        if base_lines.is_empty() {
            return Err(PipelineError::EmptyInput("label list"));
        }
        let localized_lines = localized.map(label_lines).unwrap_or_default();

        let species = base_lines
            .iter()
            .enumerate()
            .map(|(i, &line)| {
                let name = common_name(line).unwrap_or(line).to_string();
                let name_i18n = localized_lines
                    .get(i)
                    .and_then(|l| common_name(l))
                    .map(str::to_string)
                    .unwrap_or_else(|| name.clone());
                Species {
                    label: line.to_string(),
                    name,
                    name_i18n,
                }
            })
            .collect();
        Ok(Self { species })
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Species> {
        self.species.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Species> {
        self.species.iter()
    }

    /// Display name: localized when available.
    pub fn display_name(&self, index: usize) -> &str {
        self.species
            .get(index)
            .map(|s| if s.name_i18n.is_empty() { s.name.as_str() } else { s.name_i18n.as_str() })
            .unwrap_or_default()
    }
}
