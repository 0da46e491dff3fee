//! Prompt file parser.
//!
//! A prompt file is a line-oriented text format with `[section]` headers.
//! Everything after a `#` is a comment. The four sections the expander
//! consumes are `[subjects]`, `[styles]`, `[prefixes]` and `[suffixes]`;
//! any other section is kept by name and otherwise ignored.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::CoreError;

/// Comment marker; the marker and the rest of the line are discarded.
pub const COMMENT_MARKER: char = '#';

/// Leading character of a setting directive inside `[subjects]`.
pub const DIRECTIVE_SENTINEL: char = '!';

pub const SECTION_SUBJECTS: &str = "subjects";
pub const SECTION_STYLES: &str = "styles";
pub const SECTION_PREFIXES: &str = "prefixes";
pub const SECTION_SUFFIXES: &str = "suffixes";

/// Ordered lists extracted from one prompt file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptLists {
    /// Subject prompts and `!name=value` directives, in file order.
    pub subjects: Vec<String>,
    pub styles: Vec<String>,
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// Sections with unrecognised names, keyed by lowercased name.
    pub extra: BTreeMap<String, Vec<String>>,
}

impl PromptLists {
    fn section_mut(&mut self, name: &str) -> &mut Vec<String> {
        match name {
            SECTION_SUBJECTS => &mut self.subjects,
            SECTION_STYLES => &mut self.styles,
            SECTION_PREFIXES => &mut self.prefixes,
            SECTION_SUFFIXES => &mut self.suffixes,
            other => self.extra.entry(other.to_string()).or_default(),
        }
    }

    /// Number of subject lines that are prompts rather than directives.
    pub fn prompt_subject_count(&self) -> usize {
        self.subjects
            .iter()
            .filter(|s| !is_directive(s))
            .count()
    }
}

/// Whether a subject line is a setting directive.
pub fn is_directive(line: &str) -> bool {
    line.starts_with(DIRECTIVE_SENTINEL)
}

/// Strip the comment and surrounding whitespace from one raw line.
fn clean_line(raw: &str) -> &str {
    let content = match raw.find(COMMENT_MARKER) {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    content.trim()
}

/// Return the lowercased section name if `line` is a `[name]` header.
fn section_header(line: &str) -> Option<String> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim().to_lowercase())
}

/// Parse prompt file text into its section lists.
pub fn parse(source: &str) -> PromptLists {
    let mut lists = PromptLists::default();
    let mut current: Option<String> = None;

    for (line_no, raw) in source.lines().enumerate() {
        let line = clean_line(raw);
        if line.is_empty() {
            continue;
        }

        if let Some(name) = section_header(line) {
            current = Some(name);
            continue;
        }

        match &current {
            Some(name) => lists.section_mut(name).push(line.to_string()),
            None => {
                tracing::debug!(
                    line = line_no + 1,
                    text = line,
                    "Ignoring line before first section header",
                );
            }
        }
    }

    lists
}

/// Read and parse a prompt file.
pub fn load(path: &Path) -> Result<PromptLists, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| CoreError::SourceRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse(&text))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
